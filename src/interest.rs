//! Readiness interest flags, mirroring the teacher's `Interest` bitset
//! (`interests.rs` / `event_imp.rs`).

use std::fmt;
use std::num::NonZeroU8;
use std::ops;

const READABLE: u8 = 0b0_001;
const WRITABLE: u8 = 0b0_010;
const AIO: u8 = 0b0_100;
const LIO: u8 = 0b1_000;

/// What kind of readiness a registration should be notified for.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Interest(NonZeroU8);

impl Interest {
    pub const READABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(READABLE) });
    pub const WRITABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(WRITABLE) });
    pub const AIO: Interest = Interest(unsafe { NonZeroU8::new_unchecked(AIO) });
    pub const LIO: Interest = Interest(unsafe { NonZeroU8::new_unchecked(LIO) });

    pub const fn is_readable(self) -> bool {
        self.0.get() & READABLE != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0.get() & WRITABLE != 0
    }

    pub const fn is_aio(self) -> bool {
        self.0.get() & AIO != 0
    }

    pub const fn is_lio(self) -> bool {
        self.0.get() & LIO != 0
    }

    pub(crate) const fn as_u8(self) -> u8 {
        self.0.get()
    }

    pub(crate) fn add(self, other: Interest) -> Interest {
        Interest(NonZeroU8::new(self.0.get() | other.0.get()).unwrap())
    }
}

impl ops::BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        macro_rules! one {
            ($name:expr, $cond:expr) => {
                if $cond {
                    if !first {
                        f.write_str(" | ")?;
                    }
                    f.write_str($name)?;
                    first = false;
                }
            };
        }
        one!("READABLE", self.is_readable());
        one!("WRITABLE", self.is_writable());
        one!("AIO", self.is_aio());
        one!("LIO", self.is_lio());
        Ok(())
    }
}
