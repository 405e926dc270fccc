//! Object-state tracking and diagnostic assertions for Vulkan validation conformance tests.
//!
//! This crate models the state that a Vulkan validation layer keeps about a device, and lets
//! test code assert on the diagnostics that misuse of the API produces. It consists of:
//!
//! - The [resource registry], which owns the lifecycle of every object created through a
//!   [`Device`].
//! - The [layout and ownership tracker], which keeps the layout and queue family ownership of
//!   every image and buffer subresource, and merges the transition logs that command buffers
//!   record into that state when they are submitted.
//! - The [binding validator], which checks memory binding, allocation import and memory
//!   requirement queries.
//! - The [rule engine], which evaluates a catalog of named predicates at each checkpoint and
//!   turns failures into [`Diagnostic`]s identified by their VUID.
//! - The [error monitor], which collects diagnostics and compares them against what a test
//!   expects.
//!
//! Every operation on a [`Device`] takes a [`DiagnosticSink`] explicitly. There is no global
//! error accumulator, so independent tests can run in parallel against independent devices.
//!
//! ```
//! use vkconform::{
//!     device::{Device, DeviceCreateInfo},
//!     environment::{Environment, EnvironmentCreateInfo},
//!     format::Format,
//!     image::{ImageCreateInfo, ImageUsage},
//!     monitor::ErrorMonitor,
//! };
//!
//! let environment = Environment::new(EnvironmentCreateInfo::default()).unwrap();
//! let device = Device::new(environment, DeviceCreateInfo::default()).unwrap();
//! let monitor = ErrorMonitor::default();
//!
//! monitor.expect("VUID-VkImageCreateInfo-pNext-01975");
//! let result = device.create_image(
//!     &monitor,
//!     ImageCreateInfo {
//!         format: Format::UNDEFINED,
//!         extent: [64, 64, 1],
//!         usage: ImageUsage::SAMPLED,
//!         ..Default::default()
//!     },
//! );
//! assert!(result.is_err());
//! monitor.verify_found().unwrap();
//! ```
//!
//! [resource registry]: resource
//! [layout and ownership tracker]: tracker
//! [binding validator]: binding
//! [rule engine]: rules
//! [error monitor]: monitor
//! [`Device`]: device::Device
//! [`DiagnosticSink`]: monitor::DiagnosticSink

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::{
    cmp,
    error::Error as StdError,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    num::NonZero,
    sync::Arc,
};

#[cfg(test)]
#[macro_use]
mod tests;
pub mod binding;
pub mod buffer;
pub mod command_buffer;
pub mod device;
pub mod environment;
pub mod format;
pub mod image;
mod macros;
pub mod memory;
pub mod monitor;
pub mod render_pass;
pub mod resource;
pub mod rules;
pub mod swapchain;
pub mod sync;
pub mod tracker;

/// Represents memory size and offset values on a Vulkan device.
/// Analogous to the Rust `usize` type on the host.
pub use ash::vk::DeviceSize;

/// This ID type is used throughout the crate to refer to objects tracked by a [`Device`].
///
/// The type parameter denotes the type of object being referred to. The erased form `Id` (with
/// the default parameter) can refer to an object of any type, which is recovered with
/// [`object_type`].
///
/// IDs are handed out from a monotonic counter and are never reused, not even after the object
/// they refer to has been destroyed. This is what allows use of a destroyed object to be
/// diagnosed rather than aliasing a newer object.
///
/// Note that this ID **is not** globally unique. It is unique in the scope of a device.
///
/// [`Device`]: device::Device
/// [`object_type`]: Self::object_type
#[repr(transparent)]
pub struct Id<T = ()> {
    raw: NonZero<u64>,
    marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    const TAG_BITS: u32 = 8;

    const TAG_FACTOR: NonZero<u64> = match NonZero::new(1 << Self::TAG_BITS) {
        Some(factor) => factor,
        None => unreachable!(),
    };

    /// The largest serial that fits next to the tag.
    const MAX_SERIAL: NonZero<u64> = match NonZero::new(u64::MAX >> Self::TAG_BITS) {
        Some(serial) => serial,
        None => unreachable!(),
    };

    const fn from_raw(raw: NonZero<u64>) -> Self {
        Id {
            raw,
            marker: PhantomData,
        }
    }

    /// Returns the serial number of the object, which is the order in which it was created.
    #[inline]
    pub const fn serial(self) -> u64 {
        self.raw.get() >> Self::TAG_BITS
    }

    #[inline]
    const fn tag(self) -> u8 {
        (self.raw.get() & 0xff) as u8
    }

    /// Returns the type of object that this ID refers to, or `None` if the tag of the ID names no
    /// type.
    #[inline]
    pub fn object_type(self) -> Option<ObjectType> {
        ObjectType::from_tag(self.tag())
    }

    /// Erases the type parameter of the ID.
    #[inline]
    pub const fn erase(self) -> Id {
        Id::from_raw(self.raw)
    }

    /// Returns whether this ID refers to an object of type `O`.
    #[inline]
    pub fn is<O: Object>(self) -> bool {
        self.object_type() == Some(O::TYPE)
    }

    /// Recovers the type parameter of an erased ID, if it refers to an object of type `O`.
    #[inline]
    pub fn downcast<O: Object>(self) -> Option<Id<O>> {
        self.is::<O>().then(|| Id::from_raw(self.raw))
    }
}

impl<O: Object> Id<O> {
    pub(crate) fn new(serial: NonZero<u64>) -> Self {
        // Serials past 56 bits, which would take centuries to hand out, stick at the largest one
        // so that the tag stays intact.
        let raw = serial
            .min(Self::MAX_SERIAL)
            .saturating_mul(Self::TAG_FACTOR)
            | O::TYPE as u64;

        Id::from_raw(raw)
    }
}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object_type() {
            Some(object_type) => write!(f, "{object_type:?}#{}", self.serial()),
            None => write!(f, "Unknown({})#{}", self.tag(), self.serial()),
        }
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

/// The types of object that a [`Device`] keeps track of.
///
/// [`Device`]: device::Device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    Image = 0,
    ImageView = 1,
    Buffer = 2,
    DeviceMemory = 3,
    RenderPass = 4,
    Framebuffer = 5,
    CommandBuffer = 6,
    Swapchain = 7,
}

impl ObjectType {
    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ObjectType::Image,
            1 => ObjectType::ImageView,
            2 => ObjectType::Buffer,
            3 => ObjectType::DeviceMemory,
            4 => ObjectType::RenderPass,
            5 => ObjectType::Framebuffer,
            6 => ObjectType::CommandBuffer,
            7 => ObjectType::Swapchain,
            _ => return None,
        })
    }
}

/// An object that is stored in the [`Resources`] of a device.
///
/// [`Resources`]: resource::Resources
pub trait Object: Sized + Send + Sync + 'static {
    const TYPE: ObjectType;

    #[doc(hidden)]
    fn storage(resources: &resource::Resources) -> &resource::Storage<Self>;
}

/// The class of a violation.
///
/// Each [`Diagnostic`] carries a precise VUID, but also one of these broader kinds, which tests
/// can match on when the exact identifier is not what they're interested in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ErrorKind {
    /// The parameters of an operation violate a structural constraint.
    InvalidParams,

    /// An object was used after it was destroyed, or destroyed while still in use.
    UseAfterFree,

    /// An object does not exist.
    NotFound,

    /// The layout that an operation expects doesn't match the tracked layout.
    LayoutMismatch,

    /// A resource was used on a queue family that doesn't own it.
    OwnershipViolation,

    /// A memory allocation is too small for the resource bound to it.
    InsufficientSize,

    /// A memory offset is not a multiple of the required alignment.
    BadAlignment,

    /// A memory type is not compatible with the resource bound to it.
    IncompatibleMemoryType,

    /// An imported allocation doesn't match the properties of its import source.
    ImportMismatch,

    /// The usage of a resource is not supported by the properties of its import source.
    ImportUsageMismatch,

    /// A dedicated allocation is bound to a resource other than the one it is dedicated to.
    DedicatedAllocationMismatch,

    /// Memory requirements were queried for a resource whose requirements are only known once it
    /// is bound.
    QueryBeforeBind,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::InvalidParams => "invalid parameters",
            Self::UseAfterFree => "use of a destroyed or in-use object",
            Self::NotFound => "object not found",
            Self::LayoutMismatch => "image layout mismatch",
            Self::OwnershipViolation => "queue family ownership violation",
            Self::InsufficientSize => "insufficient memory size",
            Self::BadAlignment => "bad memory alignment",
            Self::IncompatibleMemoryType => "incompatible memory type",
            Self::ImportMismatch => "imported memory mismatch",
            Self::ImportUsageMismatch => "imported memory usage mismatch",
            Self::DedicatedAllocationMismatch => "dedicated allocation mismatch",
            Self::QueryBeforeBind => "memory requirements queried before binding",
        };

        f.write_str(msg)
    }
}

/// The severity of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };

        f.write_str(msg)
    }
}

/// A report of a violated rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// The identifier of the violated rule, reproduced exactly as it appears in the rule catalog.
    pub vuid: Arc<str>,

    /// The class of the violation.
    pub kind: ErrorKind,

    pub severity: Severity,

    /// A description of the problem.
    pub message: String,

    /// The objects that the violation concerns.
    pub objects: SmallVec<[Id; 2]>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.vuid, self.message)?;

        if !self.objects.is_empty() {
            f.write_str(" (")?;

            for (index, object) in self.objects.iter().enumerate() {
                if index != 0 {
                    f.write_str(", ")?;
                }

                write!(f, "{object:?}")?;
            }

            f.write_str(")")?;
        }

        Ok(())
    }
}

/// Error returned by an operation on a [`Device`] that was rejected.
///
/// By the time this error is returned, the diagnostics that caused it have already been reported
/// to the sink that was passed to the operation.
///
/// [`Device`]: device::Device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    vuid: Option<Arc<str>>,
    object: Option<Id>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            vuid: None,
            object: None,
        }
    }

    pub(crate) fn not_found<T>(id: Id<T>) -> Self {
        Error {
            kind: ErrorKind::NotFound,
            vuid: None,
            object: Some(id.erase()),
        }
    }

    pub(crate) fn from_diagnostic(diagnostic: &Diagnostic) -> Self {
        Error {
            kind: diagnostic.kind,
            vuid: Some(diagnostic.vuid.clone()),
            object: diagnostic.objects.first().copied(),
        }
    }

    /// Returns the class of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the VUID of the first diagnostic that caused the operation to be rejected, if the
    /// error originates from a rule.
    #[inline]
    pub fn vuid(&self) -> Option<&str> {
        self.vuid.as_deref()
    }

    /// Returns the object that the error concerns, if any.
    #[inline]
    pub fn object(&self) -> Option<Id> {
        self.object
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(vuid) = &self.vuid {
            write!(f, " ({vuid})")?;
        }

        if let Some(object) = self.object {
            write!(f, " for {object:?}")?;
        }

        Ok(())
    }
}

impl StdError for Error {}

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate, so it forces structs containing it to be
/// constructed using `..Default::default()`, which keeps adding new fields a non-breaking change.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());

impl fmt::Debug for NonExhaustive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("NonExhaustive")
    }
}

#[cfg(test)]
mod id_tests {
    use super::*;
    use crate::image::Image;

    #[test]
    fn tag_round_trip() {
        let id = Id::<Image>::new(NonZero::new(42).unwrap());
        assert_eq!(id.serial(), 42);
        assert_eq!(id.object_type(), Some(ObjectType::Image));
        assert!(id.erase().is::<Image>());
        assert_eq!(id.erase().downcast::<Image>(), Some(id));
        assert!(id
            .erase()
            .downcast::<crate::buffer::Buffer>()
            .is_none());
    }

    #[test]
    fn serial_overflow_keeps_tag() {
        let id = Id::<crate::swapchain::Swapchain>::new(NonZero::<u64>::MAX);
        assert_eq!(id.object_type(), Some(ObjectType::Swapchain));
        assert_eq!(id.serial(), u64::MAX >> 8);

        let id = Id::<Image>::new(NonZero::<u64>::MAX);
        assert_eq!(id.object_type(), Some(ObjectType::Image));
        assert!(id.erase().downcast::<crate::swapchain::Swapchain>().is_none());
    }

    #[test]
    fn unknown_tag() {
        let id = Id::<()>::from_raw(NonZero::new(0x1ff).unwrap());
        assert_eq!(id.object_type(), None);
        assert!(!id.is::<crate::swapchain::Swapchain>());
        assert_eq!(format!("{id:?}"), "Unknown(255)#1");
    }

    #[test]
    fn error_display() {
        let id = Id::<Image>::new(NonZero::new(3).unwrap());
        let err = Error::not_found(id);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "object not found for Image#3");
    }
}
