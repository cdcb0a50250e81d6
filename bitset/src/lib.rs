//! The [`bitset!`] macro, for declaring typed sets of flag bits.

#![no_std]

/// Declare a transparent newtype over an integer whose bits are named flags.
///
/// ```
/// bitset::bitset!(
///     /// Access rights.
///     pub Access(u8) {
///         /// May be read.
///         Read,
///         /// May be written.
///         Write = 4,
///     }
/// );
/// let rw = Access::READ | Access::WRITE;
/// assert!(rw.read() && rw.write());
/// assert_eq!(u8::from(rw), 0b1_0001);
/// ```
///
/// Each bit gets an upper-case constant and a lower-case predicate. Bit positions default to
/// declaration order and can be given explicitly with `= position`.
#[macro_export]
macro_rules! bitset {
    (
        $( #[$set_meta:meta] )*
        $pub:vis $name:ident($repr:ty) {
            $(
                $( #[$bit_meta:meta] )*
                $bit:ident $( = $pos:expr )? ),*
            $(,)?
        }
    ) => {$crate::__macro_export::paste! {
        $( #[$set_meta] )*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        $pub struct $name($repr);
        const _: () = {
            /// Bit positions, numbered in declaration order unless given.
            enum Position {
                $( $bit $( = $pos )? ),*
            }

            impl $name {
                $(
                    $( #[$bit_meta] )*
                    pub const [< $bit:snake:upper >]: Self = Self(1 << (Position::$bit as usize));
                )*

                /// The raw value with every named bit set.
                const KNOWN: $repr = $( Self::[< $bit:snake:upper >].0 | )* 0;

                /// A set with no bits.
                pub const fn empty() -> Self {
                    Self(0)
                }

                /// A set with every named bit.
                pub const fn all() -> Self {
                    Self(Self::KNOWN)
                }

                /// The union of both sets, usable in `const` contexts.
                pub const fn bit_or(self, other: Self) -> Self {
                    Self(self.0 | other.0)
                }

                /// Whether every bit of `other` is also in `self`.
                pub const fn contains(self, other: Self) -> bool {
                    self.0 & other.0 == other.0
                }

                /// Whether no bit is set.
                pub const fn is_empty(self) -> bool {
                    self.0 == 0
                }

                $(
                    $( #[$bit_meta] )*
                    pub const fn [< $bit:snake:lower >](self) -> bool {
                        self.contains(Self::[< $bit:snake:upper >])
                    }
                )*
            }

            impl ::core::ops::BitOr for $name {
                type Output = Self;
                fn bitor(self, rhs: Self) -> Self {
                    self.bit_or(rhs)
                }
            }

            impl ::core::ops::BitOrAssign for $name {
                fn bitor_assign(&mut self, rhs: Self) {
                    *self = self.bit_or(rhs);
                }
            }

            /// Bits without a name are dropped.
            impl ::core::convert::From<$repr> for $name {
                fn from(raw: $repr) -> Self {
                    Self(raw & Self::KNOWN)
                }
            }

            impl ::core::convert::From<$name> for $repr {
                fn from(set: $name) -> $repr {
                    set.0
                }
            }

            impl ::core::default::Default for $name {
                fn default() -> Self {
                    Self::empty()
                }
            }

            impl ::core::fmt::Display for $name {
                fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                    f.write_str(::core::concat!(::core::stringify!($name), " {"))?;
                    $(
                        if self.[< $bit:snake:lower >]() {
                            f.write_str(::core::concat!(" ", ::core::stringify!($bit)))?;
                        }
                    )*
                    f.write_str(" }")
                }
            }

            // SAFETY:
            // `#[repr(transparent)]` around plain old data is plain old data.
            unsafe impl $crate::__macro_export::Pod for $name
                where $repr: $crate::__macro_export::Pod {}
            // SAFETY: All zeros is the empty set.
            unsafe impl $crate::__macro_export::Zeroable for $name
                where $repr: $crate::__macro_export::Zeroable {}
        };
    }};
}

#[doc(hidden)]
pub mod __macro_export {
    pub use paste::paste;

    pub use bytemuck::{Pod, Zeroable};
}
