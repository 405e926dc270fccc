//! The simulated physical device and platform that a [`Device`] runs on.
//!
//! Tests often need to know whether the environment supports an extension or runs on a specific
//! platform before they can meaningfully run. The `require_*` methods return a [`SkipReason`]
//! that can be handed to [`ErrorMonitor::skip`], so that the test reports a skip instead of a
//! false pass.
//!
//! This module also simulates Android hardware buffers, which are the import source for the
//! external-format images and imported allocations that the binding rules check.
//!
//! [`Device`]: crate::device::Device
//! [`ErrorMonitor::skip`]: crate::monitor::ErrorMonitor::skip

use crate::{
    format::Format,
    image::ImageType,
    macros::vulkan_bitflags,
    memory::MemoryPropertyFlags,
    monitor::SkipReason,
    DeviceSize, Error, ErrorKind, NonExhaustive,
};
use std::{
    fmt,
    num::NonZero,
    ops::{BitOr, BitOrAssign},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// The extension that allows importing and exporting Android hardware buffers.
pub const ANDROID_HARDWARE_BUFFER_EXTENSION: &str =
    "VK_ANDROID_external_memory_android_hardware_buffer";

/// The name of the extension that portability subset implementations expose.
pub const PORTABILITY_SUBSET_EXTENSION: &str = "VK_KHR_portability_subset";

vulkan_bitflags! {
    /// Attributes of a queue or queue family.
    QueueFlags = QueueFlags(u32);

    GRAPHICS = GRAPHICS,
    COMPUTE = COMPUTE,
    TRANSFER = TRANSFER,
    SPARSE_BINDING = SPARSE_BINDING,
    PROTECTED = PROTECTED,
}

/// Properties of a queue family.
#[derive(Clone, Debug)]
pub struct QueueFamilyProperties {
    pub queue_flags: QueueFlags,
    pub queue_count: u32,
}

/// The features of a portability subset implementation. Each feature that is `false` is a
/// restriction that is validated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortabilitySubsetFeatures {
    /// Whether 2D and 2D array views can be created of 3D images.
    pub image_view_2d_on_3d_image: bool,

    /// Whether image views can reinterpret the format of the image with a different number of
    /// components or bits per component.
    pub image_view_format_reinterpretation: bool,

    /// Whether image views can have a component mapping other than the identity.
    pub image_view_format_swizzle: bool,

    /// Whether multisampled images can have more than one array layer.
    pub multisample_array_image: bool,
}

/// A memory type of the physical device.
#[derive(Clone, Copy, Debug)]
pub struct MemoryType {
    pub property_flags: MemoryPropertyFlags,
    pub heap_index: u32,
}

/// The platform that the environment simulates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Windows,
    Android,
    MacOs,
}

/// Parameters to create a new [`Environment`].
#[derive(Clone, Debug)]
pub struct EnvironmentCreateInfo {
    /// The queue families of the physical device.
    ///
    /// The default value is a graphics family with 4 queues, a compute family with 2 queues and a
    /// transfer-only family with 1 queue.
    pub queue_families: Vec<QueueFamilyProperties>,

    /// The memory types of the physical device. Their indices are the memory type indices that
    /// allocations refer to.
    ///
    /// The default value is, in order: device-local, host-visible and coherent, lazily allocated
    /// and protected.
    pub memory_types: Vec<MemoryType>,

    /// The names of the device extensions that are supported.
    pub supported_extensions: Vec<String>,

    /// The default value is [`Platform::Linux`].
    pub platform: Platform,

    /// The alignment of the memory requirements of images with optimal tiling.
    ///
    /// The default value is `1024`.
    pub optimal_image_alignment: DeviceSize,

    /// The alignment of the memory requirements of images with linear tiling.
    ///
    /// The default value is `256`.
    pub linear_image_alignment: DeviceSize,

    /// The alignment of the memory requirements of buffers.
    ///
    /// The default value is `256`.
    pub buffer_alignment: DeviceSize,

    /// The largest width of a 1D image.
    ///
    /// The default value is `16384`.
    pub max_image_dimension_1d: u32,

    /// The largest width and height of a 2D image.
    ///
    /// The default value is `16384`.
    pub max_image_dimension_2d: u32,

    /// The largest width, height and depth of a 3D image.
    ///
    /// The default value is `2048`.
    pub max_image_dimension_3d: u32,

    /// The features of the portability subset, if the physical device is a portability subset
    /// implementation.
    ///
    /// The default value is `None`.
    pub portability_subset: Option<PortabilitySubsetFeatures>,

    pub _ne: NonExhaustive,
}

impl Default for EnvironmentCreateInfo {
    fn default() -> Self {
        EnvironmentCreateInfo {
            queue_families: vec![
                QueueFamilyProperties {
                    queue_flags: QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                    queue_count: 4,
                },
                QueueFamilyProperties {
                    queue_flags: QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                    queue_count: 2,
                },
                QueueFamilyProperties {
                    queue_flags: QueueFlags::TRANSFER,
                    queue_count: 1,
                },
            ],
            memory_types: vec![
                MemoryType {
                    property_flags: MemoryPropertyFlags::DEVICE_LOCAL,
                    heap_index: 0,
                },
                MemoryType {
                    property_flags: MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT,
                    heap_index: 1,
                },
                MemoryType {
                    property_flags: MemoryPropertyFlags::DEVICE_LOCAL
                        | MemoryPropertyFlags::LAZILY_ALLOCATED,
                    heap_index: 0,
                },
                MemoryType {
                    property_flags: MemoryPropertyFlags::DEVICE_LOCAL
                        | MemoryPropertyFlags::PROTECTED,
                    heap_index: 0,
                },
            ],
            supported_extensions: [
                "VK_KHR_swapchain",
                "VK_KHR_dedicated_allocation",
                "VK_KHR_external_memory",
                "VK_KHR_external_memory_fd",
                "VK_KHR_imageless_framebuffer",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            platform: Platform::Linux,
            optimal_image_alignment: 1024,
            linear_image_alignment: 256,
            buffer_alignment: 256,
            max_image_dimension_1d: 16384,
            max_image_dimension_2d: 16384,
            max_image_dimension_3d: 2048,
            portability_subset: None,
            _ne: NonExhaustive(()),
        }
    }
}

impl EnvironmentCreateInfo {
    /// Returns the default environment, but running on Android and supporting the Android
    /// hardware buffer extension.
    pub fn android() -> Self {
        let mut create_info = EnvironmentCreateInfo {
            platform: Platform::Android,
            ..Default::default()
        };
        create_info
            .supported_extensions
            .push(ANDROID_HARDWARE_BUFFER_EXTENSION.to_owned());

        create_info
    }

    /// Returns the default environment, but running on macOS through a portability subset
    /// implementation that has none of the optional portability features.
    pub fn portability() -> Self {
        let mut create_info = EnvironmentCreateInfo {
            platform: Platform::MacOs,
            portability_subset: Some(PortabilitySubsetFeatures::default()),
            ..Default::default()
        };
        create_info
            .supported_extensions
            .push(PORTABILITY_SUBSET_EXTENSION.to_owned());

        create_info
    }
}

/// The physical device and platform that a device is created on.
#[derive(Debug)]
pub struct Environment {
    queue_family_properties: Vec<QueueFamilyProperties>,
    memory_types: Vec<MemoryType>,
    supported_extensions: Vec<String>,
    platform: Platform,
    optimal_image_alignment: DeviceSize,
    linear_image_alignment: DeviceSize,
    buffer_alignment: DeviceSize,
    max_image_dimensions: [u32; 3],
    portability_subset: Option<PortabilitySubsetFeatures>,
    next_hardware_buffer_id: AtomicU64,
}

impl Environment {
    /// Creates a new `Environment`.
    pub fn new(create_info: EnvironmentCreateInfo) -> Result<Arc<Environment>, Error> {
        let EnvironmentCreateInfo {
            queue_families,
            memory_types,
            supported_extensions,
            platform,
            optimal_image_alignment,
            linear_image_alignment,
            buffer_alignment,
            max_image_dimension_1d,
            max_image_dimension_2d,
            max_image_dimension_3d,
            portability_subset,
            _ne: _,
        } = create_info;
        let max_image_dimensions = [
            max_image_dimension_1d,
            max_image_dimension_2d,
            max_image_dimension_3d,
        ];

        if queue_families.is_empty()
            || queue_families.iter().any(|family| family.queue_count == 0)
            || memory_types.is_empty()
            || memory_types.len() > 32
            || max_image_dimensions.contains(&0)
        {
            return Err(Error::new(ErrorKind::InvalidParams));
        }

        if [
            optimal_image_alignment,
            linear_image_alignment,
            buffer_alignment,
        ]
        .into_iter()
        .any(|alignment| !alignment.is_power_of_two())
        {
            return Err(Error::new(ErrorKind::InvalidParams));
        }

        Ok(Arc::new(Environment {
            queue_family_properties: queue_families,
            memory_types,
            supported_extensions,
            platform,
            optimal_image_alignment,
            linear_image_alignment,
            buffer_alignment,
            max_image_dimensions,
            portability_subset,
            next_hardware_buffer_id: AtomicU64::new(1),
        }))
    }

    #[inline]
    pub fn queue_family_properties(&self) -> &[QueueFamilyProperties] {
        &self.queue_family_properties
    }

    #[inline]
    pub fn memory_types(&self) -> &[MemoryType] {
        &self.memory_types
    }

    #[inline]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    #[inline]
    pub fn optimal_image_alignment(&self) -> DeviceSize {
        self.optimal_image_alignment
    }

    #[inline]
    pub fn linear_image_alignment(&self) -> DeviceSize {
        self.linear_image_alignment
    }

    #[inline]
    pub fn buffer_alignment(&self) -> DeviceSize {
        self.buffer_alignment
    }

    /// Returns the portability subset features, if the physical device is a portability subset
    /// implementation.
    #[inline]
    pub fn portability_subset(&self) -> Option<&PortabilitySubsetFeatures> {
        self.portability_subset.as_ref()
    }

    /// Returns the largest extent in any dimension of an image of the given type.
    #[inline]
    pub fn max_image_dimension(&self, image_type: ImageType) -> u32 {
        match image_type {
            ImageType::Dim1d => self.max_image_dimensions[0],
            ImageType::Dim2d => self.max_image_dimensions[1],
            ImageType::Dim3d => self.max_image_dimensions[2],
        }
    }

    /// Returns a bitmask of the memory types whose properties contain all of `required` and none
    /// of `excluded`.
    pub fn memory_type_bits(
        &self,
        required: MemoryPropertyFlags,
        excluded: MemoryPropertyFlags,
    ) -> u32 {
        self.memory_types
            .iter()
            .enumerate()
            .filter(|(_, memory_type)| {
                memory_type.property_flags.contains(required)
                    && !memory_type.property_flags.intersects(excluded)
            })
            .fold(0, |bits, (index, _)| bits | (1 << index))
    }

    #[inline]
    pub fn is_extension_supported(&self, name: &str) -> bool {
        self.supported_extensions.iter().any(|ext| ext == name)
    }

    #[inline]
    pub fn is_platform(&self, platform: Platform) -> bool {
        self.platform == platform
    }

    /// Returns `Err` with a reason to skip the current test if the extension is not supported.
    pub fn require_extension(&self, name: &str) -> Result<(), SkipReason> {
        if self.is_extension_supported(name) {
            Ok(())
        } else {
            Err(SkipReason::new(format!("extension `{name}` is not supported")))
        }
    }

    /// Returns `Err` with a reason to skip the current test if the environment does not run on
    /// `platform`.
    pub fn require_platform(&self, platform: Platform) -> Result<(), SkipReason> {
        if self.is_platform(platform) {
            Ok(())
        } else {
            Err(SkipReason::new(format!(
                "the test requires platform {platform:?}, but the environment runs on {:?}",
                self.platform,
            )))
        }
    }

    /// Allocates a new simulated Android hardware buffer.
    ///
    /// Returns an error if the environment doesn't support the Android hardware buffer extension,
    /// or if the description has a zero dimension.
    pub fn allocate_hardware_buffer(
        &self,
        desc: HardwareBufferDesc,
    ) -> Result<Arc<HardwareBuffer>, Error> {
        if !self.is_extension_supported(ANDROID_HARDWARE_BUFFER_EXTENSION) {
            return Err(Error::new(ErrorKind::NotFound));
        }

        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(Error::new(ErrorKind::InvalidParams));
        }

        // Blob buffers are one-dimensional.
        if desc.format == HardwareBufferFormat::Blob && (desc.height != 1 || desc.layers != 1) {
            return Err(Error::new(ErrorKind::InvalidParams));
        }

        let id = self.next_hardware_buffer_id.fetch_add(1, Ordering::Relaxed);

        Ok(Arc::new(HardwareBuffer { id, desc }))
    }

    /// Returns the properties of a hardware buffer as the device sees them.
    pub fn hardware_buffer_properties(&self, buffer: &HardwareBuffer) -> HardwareBufferProperties {
        const PAGE_SIZE: DeviceSize = 4096;

        let desc = &buffer.desc;

        HardwareBufferProperties {
            allocation_size: desc.byte_size().next_multiple_of(PAGE_SIZE),
            memory_type_bits: self.memory_type_bits(
                MemoryPropertyFlags::DEVICE_LOCAL,
                MemoryPropertyFlags::PROTECTED | MemoryPropertyFlags::LAZILY_ALLOCATED,
            ),
            format: desc.format.vulkan_format(),
            external_format: NonZero::new(0x1000 + desc.format as u64),
        }
    }
}

/// The format of an Android hardware buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HardwareBufferFormat {
    R8G8B8A8Unorm = 1,
    R8G8B8X8Unorm = 2,
    R8G8B8Unorm = 3,
    R5G6B5Unorm = 4,
    R16G16B16A16Float = 0x16,
    R10G10B10A2Unorm = 0x2b,
    Blob = 0x21,
    Y8Cb8Cr8_420 = 0x23,
    D16Unorm = 0x30,
}

impl HardwareBufferFormat {
    /// Returns the Vulkan format that corresponds to this format, or [`Format::UNDEFINED`] if the
    /// format can only be used through an external format.
    pub fn vulkan_format(self) -> Format {
        match self {
            Self::R8G8B8A8Unorm | Self::R8G8B8X8Unorm => Format::R8G8B8A8_UNORM,
            Self::R8G8B8Unorm => Format::R8G8B8_UNORM,
            Self::R5G6B5Unorm => Format::R5G6B5_UNORM_PACK16,
            Self::R16G16B16A16Float => Format::R16G16B16A16_SFLOAT,
            Self::R10G10B10A2Unorm => Format::A2B10G10R10_UNORM_PACK32,
            Self::D16Unorm => Format::D16_UNORM,
            Self::Blob | Self::Y8Cb8Cr8_420 => Format::UNDEFINED,
        }
    }

    // Bytes per texel, doubled so that the subsampled YCbCr format is exact.
    fn double_texel_size(self) -> DeviceSize {
        match self {
            Self::Blob => 2,
            Self::Y8Cb8Cr8_420 => 3,
            Self::R5G6B5Unorm | Self::D16Unorm => 4,
            Self::R8G8B8Unorm => 6,
            Self::R8G8B8A8Unorm | Self::R8G8B8X8Unorm | Self::R10G10B10A2Unorm => 8,
            Self::R16G16B16A16Float => 16,
        }
    }
}

/// The usage flags of an Android hardware buffer.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HardwareBufferUsage(u64);

impl HardwareBufferUsage {
    pub const CPU_READ_OFTEN: Self = Self(3);
    pub const CPU_WRITE_OFTEN: Self = Self(3 << 4);
    pub const GPU_SAMPLED_IMAGE: Self = Self(1 << 8);
    pub const GPU_FRAMEBUFFER: Self = Self(1 << 9);
    pub const PROTECTED_CONTENT: Self = Self(1 << 14);
    pub const GPU_DATA_BUFFER: Self = Self(1 << 24);
    pub const GPU_CUBE_MAP: Self = Self(1 << 25);
    pub const GPU_MIPMAP_COMPLETE: Self = Self(1 << 26);

    /// The usages that make a hardware buffer accessible to the device.
    pub const GPU_ANY: Self = Self(
        Self::GPU_SAMPLED_IMAGE.0
            | Self::GPU_FRAMEBUFFER.0
            | Self::GPU_DATA_BUFFER.0
            | Self::GPU_CUBE_MAP.0
            | Self::GPU_MIPMAP_COMPLETE.0,
    );

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for HardwareBufferUsage {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for HardwareBufferUsage {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for HardwareBufferUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareBufferUsage({:#x})", self.0)
    }
}

/// Describes a hardware buffer to allocate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareBufferDesc {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: HardwareBufferFormat,
    pub usage: HardwareBufferUsage,
}

impl HardwareBufferDesc {
    fn byte_size(&self) -> DeviceSize {
        let texels = self.width as DeviceSize * self.height as DeviceSize * self.layers as DeviceSize;
        let size = (texels * self.format.double_texel_size()).div_ceil(2);

        // A full mip chain takes at most a third more.
        if self.usage.intersects(HardwareBufferUsage::GPU_MIPMAP_COMPLETE) {
            size + size.div_ceil(3)
        } else {
            size
        }
    }
}

/// A simulated Android hardware buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct HardwareBuffer {
    id: u64,
    desc: HardwareBufferDesc,
}

impl HardwareBuffer {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn desc(&self) -> &HardwareBufferDesc {
        &self.desc
    }
}

/// The properties of a hardware buffer, as returned by
/// [`Device::hardware_buffer_properties`].
///
/// [`Device::hardware_buffer_properties`]: crate::device::Device::hardware_buffer_properties
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareBufferProperties {
    /// The size that an allocation importing the buffer must have.
    pub allocation_size: DeviceSize,

    /// The memory types that an allocation importing the buffer may have.
    pub memory_type_bits: u32,

    /// The Vulkan format equivalent to the format of the buffer, if there is one.
    pub format: Format,

    /// The implementation-defined external format of the buffer.
    pub external_format: Option<NonZero<u64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba_desc() -> HardwareBufferDesc {
        HardwareBufferDesc {
            width: 64,
            height: 64,
            layers: 1,
            format: HardwareBufferFormat::R8G8B8A8Unorm,
            usage: HardwareBufferUsage::GPU_SAMPLED_IMAGE,
        }
    }

    #[test]
    fn default_environment() {
        let environment = Environment::new(EnvironmentCreateInfo::default()).unwrap();

        assert_eq!(environment.queue_family_properties().len(), 3);
        assert!(environment.is_extension_supported("VK_KHR_swapchain"));
        assert!(environment.is_platform(Platform::Linux));
        assert!(environment
            .require_extension(ANDROID_HARDWARE_BUFFER_EXTENSION)
            .is_err());
        assert_eq!(
            environment.memory_type_bits(
                MemoryPropertyFlags::DEVICE_LOCAL,
                MemoryPropertyFlags::PROTECTED,
            ),
            0b0101,
        );
        assert!(environment.allocate_hardware_buffer(rgba_desc()).is_err());
    }

    #[test]
    fn invalid_environment() {
        assert!(Environment::new(EnvironmentCreateInfo {
            queue_families: Vec::new(),
            ..Default::default()
        })
        .is_err());
        assert!(Environment::new(EnvironmentCreateInfo {
            buffer_alignment: 100,
            ..Default::default()
        })
        .is_err());
        assert!(Environment::new(EnvironmentCreateInfo {
            max_image_dimension_3d: 0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn hardware_buffer_properties() {
        let environment = Environment::new(EnvironmentCreateInfo::android()).unwrap();
        environment.require_platform(Platform::Android).unwrap();

        let buffer = environment.allocate_hardware_buffer(rgba_desc()).unwrap();
        let properties = environment.hardware_buffer_properties(&buffer);

        assert_eq!(properties.allocation_size, 64 * 64 * 4);
        assert_eq!(properties.memory_type_bits, 0b0001);
        assert_eq!(properties.format, Format::R8G8B8A8_UNORM);
        assert!(properties.external_format.is_some());

        let blob = environment
            .allocate_hardware_buffer(HardwareBufferDesc {
                width: 100,
                height: 1,
                layers: 1,
                format: HardwareBufferFormat::Blob,
                usage: HardwareBufferUsage::GPU_DATA_BUFFER,
            })
            .unwrap();
        assert_eq!(
            environment.hardware_buffer_properties(&blob).allocation_size,
            4096,
        );
        assert_ne!(blob.id(), buffer.id());
    }
}
