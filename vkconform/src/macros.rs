//! Generators for the flag sets and enums that mirror Vulkan types.
//!
//! Both macros take the raw values from `ash`, so a flag or variant always has the value that the
//! Vulkan headers give it. Each generated type also carries a table of its names, which is what
//! diagnostics print.

/// Defines a set of flags over an `ash` flags type.
///
/// Flags that are not listed are dropped when converting from the raw type.
macro_rules! vulkan_bitflags {
    {
        $(#[doc = $ty_doc:literal])*
        $ty:ident
        $( impl { $($impls:item)* } )?
        = $ty_ffi:ident($repr:ty);

        $(
            $(#[doc = $flag_doc:literal])*
            $flag_name:ident = $flag_name_ffi:ident,
        )+
    } => {
        $(#[doc = $ty_doc])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $ty($repr);

        impl $ty {
            $(
                $(#[doc = $flag_doc])*
                pub const $flag_name: Self = Self(ash::vk::$ty_ffi::$flag_name_ffi.as_raw());
            )*

            const NAMED: &'static [(&'static str, Self)] = &[
                $((stringify!($flag_name), Self::$flag_name),)*
            ];

            #[inline]
            pub const fn empty() -> Self {
                Self(0)
            }

            #[inline]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Returns the number of known flags that are set.
            pub fn count(self) -> u32 {
                Self::NAMED
                    .iter()
                    .filter(|&&(_, flag)| self.contains(flag))
                    .count() as u32
            }

            #[inline]
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            #[inline]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            #[inline]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            #[inline]
            pub const fn intersection(self, other: Self) -> Self {
                Self(self.0 & other.0)
            }

            /// Returns `self` with the flags of `other` removed.
            #[inline]
            pub const fn difference(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }

            /// Returns the names of the flags that are set, in declaration order.
            pub fn names(self) -> impl Iterator<Item = &'static str> {
                Self::NAMED
                    .iter()
                    .filter(move |&&(_, flag)| self.contains(flag))
                    .map(|&(name, _)| name)
            }

            $( $($impls)* )?
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut names = self.names();

                match names.next() {
                    Some(first) => {
                        f.write_str(first)?;

                        for name in names {
                            write!(f, " | {name}")?;
                        }

                        Ok(())
                    }
                    None => f.write_str("empty()"),
                }
            }
        }

        impl From<$ty> for ash::vk::$ty_ffi {
            #[inline]
            fn from(val: $ty) -> Self {
                Self::from_raw(val.0)
            }
        }

        impl From<ash::vk::$ty_ffi> for $ty {
            fn from(val: ash::vk::$ty_ffi) -> Self {
                $ty::NAMED
                    .iter()
                    .map(|&(_, flag)| flag)
                    .filter(|flag| val.as_raw() & flag.0 == flag.0)
                    .fold($ty::empty(), $ty::union)
            }
        }

        impl std::ops::BitOr for $ty {
            type Output = Self;

            #[inline]
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }

        impl std::ops::BitOrAssign for $ty {
            #[inline]
            fn bitor_assign(&mut self, rhs: Self) {
                *self = self.union(rhs);
            }
        }
    };
}

/// Defines an enum whose discriminants are the values of an `ash` enum type.
macro_rules! vulkan_enum {
    {
        $(#[$ty_attr:meta])*
        $ty:ident
        $( impl { $($impls:item)* } )?
        = $ty_ffi:ident($repr:ty);

        $(
            $(#[doc = $variant_doc:literal])*
            $variant:ident = $variant_ffi:ident,
        )+
    } => {
        $(#[$ty_attr])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $ty {
            $(
                $(#[doc = $variant_doc])*
                $variant = ash::vk::$ty_ffi::$variant_ffi.as_raw(),
            )+
        }

        impl $ty {
            const VARIANTS: &'static [Self] = &[$(Self::$variant,)+];

            /// Returns the name of the variant.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)+
                }
            }

            $( $($impls)* )?
        }

        impl From<$ty> for ash::vk::$ty_ffi {
            #[inline]
            fn from(val: $ty) -> Self {
                Self::from_raw(val as $repr)
            }
        }

        /// Fails for values that have no variant.
        impl TryFrom<ash::vk::$ty_ffi> for $ty {
            type Error = ();

            fn try_from(val: ash::vk::$ty_ffi) -> Result<Self, Self::Error> {
                $ty::VARIANTS
                    .iter()
                    .copied()
                    .find(|&variant| variant as $repr == val.as_raw())
                    .ok_or(())
            }
        }
    };
}

pub(crate) use vulkan_bitflags;
pub(crate) use vulkan_enum;
