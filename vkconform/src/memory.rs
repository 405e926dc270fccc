//! Device memory allocations, and importing and exporting them.
//!
//! An allocation may be created from scratch, imported from an external source (an Android
//! hardware buffer or a POSIX file descriptor that was exported from another allocation) or
//! dedicated to a single image or buffer. The rules in this module check these at allocation
//! time. The checks at bind time are in the [binding] module.
//!
//! [binding]: crate::binding

use crate::{
    binding::Bindable,
    buffer::Buffer,
    environment::{HardwareBuffer, HardwareBufferFormat, HardwareBufferProperties, HardwareBufferUsage},
    image::{max_mip_levels, Image, ImageCreateFlags, ImageUsage},
    macros::vulkan_bitflags,
    rules::{Operation, RuleContext, RuleResult, Violation, Violations},
    DeviceSize, Id, NonExhaustive, Object, ObjectType,
};
use std::sync::Arc;

vulkan_bitflags! {
    /// Properties of a memory type.
    MemoryPropertyFlags = MemoryPropertyFlags(u32);

    /// The memory is located on the device, and is allocated from a heap that also has the
    /// device-local flag set.
    DEVICE_LOCAL = DEVICE_LOCAL,

    /// The memory can be mapped into the memory space of the host.
    HOST_VISIBLE = HOST_VISIBLE,

    HOST_COHERENT = HOST_COHERENT,
    HOST_CACHED = HOST_CACHED,

    /// Allocations made from this memory type are lazily committed by the implementation. It is
    /// only usable for images with the transient attachment usage.
    LAZILY_ALLOCATED = LAZILY_ALLOCATED,

    /// The memory can only be accessed by the device, and only by protected queue operations.
    PROTECTED = PROTECTED,
}

vulkan_bitflags! {
    /// A set of external memory handle types.
    ExternalMemoryHandleTypes = ExternalMemoryHandleTypeFlags(u32);

    /// A POSIX file descriptor handle that is only usable with Vulkan.
    OPAQUE_FD = OPAQUE_FD,

    OPAQUE_WIN32 = OPAQUE_WIN32,
    OPAQUE_WIN32_KMT = OPAQUE_WIN32_KMT,

    /// A POSIX file descriptor handle to a Linux dma-buf.
    DMA_BUF = DMA_BUF_EXT,

    /// An Android hardware buffer.
    ANDROID_HARDWARE_BUFFER = ANDROID_HARDWARE_BUFFER_ANDROID,

    HOST_ALLOCATION = HOST_ALLOCATION_EXT,
}

/// The resource that an allocation is dedicated to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DedicatedAllocation {
    Image(Id<Image>),
    Buffer(Id<Buffer>),
}

impl DedicatedAllocation {
    /// Returns the ID of the resource, with its type erased.
    #[inline]
    pub fn id(self) -> Id {
        match self {
            DedicatedAllocation::Image(id) => id.erase(),
            DedicatedAllocation::Buffer(id) => id.erase(),
        }
    }
}

/// A simulated POSIX file descriptor that was exported from an allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExternalMemoryFd {
    pub fd: i32,
}

/// The external source that an allocation imports its memory from.
#[derive(Clone, Debug)]
pub enum MemoryImport {
    /// Imports an Android hardware buffer.
    AndroidHardwareBuffer(Arc<HardwareBuffer>),

    /// Imports a file descriptor that was previously exported with
    /// [`Device::export_memory_fd`]. The file descriptor is consumed by the import.
    ///
    /// [`Device::export_memory_fd`]: crate::device::Device::export_memory_fd
    Fd {
        handle_type: ExternalMemoryHandleTypes,
        fd: ExternalMemoryFd,
    },
}

impl MemoryImport {
    /// Returns the handle type of the imported memory.
    #[inline]
    pub fn handle_type(&self) -> ExternalMemoryHandleTypes {
        match self {
            MemoryImport::AndroidHardwareBuffer(_) => {
                ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER
            }
            MemoryImport::Fd { handle_type, .. } => *handle_type,
        }
    }
}

/// Parameters to allocate a new [`DeviceMemory`].
#[derive(Clone, Debug)]
pub struct MemoryAllocateInfo {
    /// The number of bytes to allocate.
    ///
    /// The default value is `0`, which must be overridden, unless the allocation exports an
    /// Android hardware buffer for a dedicated image.
    pub allocation_size: DeviceSize,

    /// The index of the memory type to allocate from.
    ///
    /// The default value is `0`.
    pub memory_type_index: u32,

    /// Makes the allocation dedicated to a single image or buffer.
    ///
    /// The default value is `None`.
    pub dedicated_allocation: Option<DedicatedAllocation>,

    /// The handle types that the allocation can be exported to.
    ///
    /// The default value is empty.
    pub export_handle_types: ExternalMemoryHandleTypes,

    /// The external memory to import.
    ///
    /// The default value is `None`.
    pub import: Option<MemoryImport>,

    pub _ne: NonExhaustive,
}

impl Default for MemoryAllocateInfo {
    #[inline]
    fn default() -> Self {
        MemoryAllocateInfo {
            allocation_size: 0,
            memory_type_index: 0,
            dedicated_allocation: None,
            export_handle_types: ExternalMemoryHandleTypes::empty(),
            import: None,
            _ne: NonExhaustive(()),
        }
    }
}

/// The memory requirements of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// The number of bytes of memory required.
    pub size: DeviceSize,

    /// The alignment in bytes that the offset of the binding must have.
    pub alignment: DeviceSize,

    /// The indices of the memory types that the resource can be bound to, as a bitmask.
    pub memory_type_bits: u32,

    /// Whether the resource must be bound to an allocation dedicated to it.
    pub requires_dedicated_allocation: bool,
}

/// A range of an allocation that is bound to a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBinding {
    pub memory: Id<DeviceMemory>,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

/// The record of a memory allocation.
#[derive(Debug)]
pub struct DeviceMemory {
    id: Id<DeviceMemory>,
    allocation_size: DeviceSize,
    memory_type_index: u32,
    dedicated_allocation: Option<DedicatedAllocation>,
    export_handle_types: ExternalMemoryHandleTypes,
    import: Option<MemoryImport>,
}

impl DeviceMemory {
    pub(crate) fn new(
        id: Id<DeviceMemory>,
        allocate_info: MemoryAllocateInfo,
        allocation_size: DeviceSize,
    ) -> Self {
        let MemoryAllocateInfo {
            allocation_size: _,
            memory_type_index,
            dedicated_allocation,
            export_handle_types,
            import,
            _ne: _,
        } = allocate_info;

        DeviceMemory {
            id,
            allocation_size,
            memory_type_index,
            dedicated_allocation,
            export_handle_types,
            import,
        }
    }

    #[inline]
    pub fn id(&self) -> Id<DeviceMemory> {
        self.id
    }

    /// Returns the size of the allocation. For allocations exporting a hardware buffer for a
    /// dedicated image, this is the size of the image's requirements.
    #[inline]
    pub fn allocation_size(&self) -> DeviceSize {
        self.allocation_size
    }

    #[inline]
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    #[inline]
    pub fn dedicated_allocation(&self) -> Option<DedicatedAllocation> {
        self.dedicated_allocation
    }

    #[inline]
    pub fn export_handle_types(&self) -> ExternalMemoryHandleTypes {
        self.export_handle_types
    }

    /// Returns the external memory that the allocation was imported from, if any.
    #[inline]
    pub fn import(&self) -> Option<&MemoryImport> {
        self.import.as_ref()
    }
}

impl Object for DeviceMemory {
    const TYPE: ObjectType = ObjectType::DeviceMemory;

    fn storage(resources: &crate::resource::Resources) -> &crate::resource::Storage<Self> {
        &resources.memories
    }
}

fn allocate_info<'a>(ctx: &'a RuleContext<'_>) -> Option<&'a MemoryAllocateInfo> {
    match ctx.operation() {
        Operation::AllocateMemory(allocate_info) => Some(allocate_info),
        _ => None,
    }
}

/// Returns the hardware buffer that `allocate_info` imports, and its properties.
fn hardware_buffer_import<'a>(
    ctx: &RuleContext<'_>,
    allocate_info: &'a MemoryAllocateInfo,
) -> Option<(&'a HardwareBuffer, HardwareBufferProperties)> {
    match &allocate_info.import {
        Some(MemoryImport::AndroidHardwareBuffer(buffer)) => {
            Some((buffer, ctx.environment().hardware_buffer_properties(buffer)))
        }
        _ => None,
    }
}

fn dedicated_image(
    ctx: &RuleContext<'_>,
    allocate_info: &MemoryAllocateInfo,
) -> Option<Arc<Image>> {
    match allocate_info.dedicated_allocation {
        Some(DedicatedAllocation::Image(image)) => ctx.resources().get(image).ok(),
        _ => None,
    }
}

fn exports_hardware_buffer_for_image(allocate_info: &MemoryAllocateInfo) -> bool {
    allocate_info
        .export_handle_types
        .intersects(ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER)
        && matches!(
            allocate_info.dedicated_allocation,
            Some(DedicatedAllocation::Image(_))
        )
}

pub(crate) fn memory_type_index(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };

    let memory_type_count = ctx.environment().memory_types().len() as u32;

    if allocate_info.memory_type_index >= memory_type_count {
        return Err(Violation::new(format!(
            "`memory_type_index` is {}, but the device has only {memory_type_count} memory types",
            allocate_info.memory_type_index,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn allocation_size_nonzero(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };

    if allocate_info.allocation_size == 0
        && !exports_hardware_buffer_for_image(allocate_info)
        && !matches!(
            allocate_info.import,
            Some(MemoryImport::AndroidHardwareBuffer(_))
        )
    {
        return Err(Violation::new("`allocation_size` is zero").into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_export_size(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };

    if exports_hardware_buffer_for_image(allocate_info) && allocate_info.allocation_size != 0 {
        return Err(Violation::new(format!(
            "the allocation exports an Android hardware buffer and is dedicated to an image, but \
            `allocation_size` is {} instead of 0",
            allocate_info.allocation_size,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_import_size(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let Some((_, properties)) = hardware_buffer_import(ctx, allocate_info) else {
        return Ok(());
    };

    if allocate_info.allocation_size != properties.allocation_size {
        return Err(Violation::new(format!(
            "`allocation_size` is {}, but the imported hardware buffer requires an allocation \
            size of {}",
            allocate_info.allocation_size, properties.allocation_size,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_import_memory_type(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let Some((_, properties)) = hardware_buffer_import(ctx, allocate_info) else {
        return Ok(());
    };

    if properties.memory_type_bits & (1 << allocate_info.memory_type_index.min(31)) == 0 {
        return Err(Violation::new(format!(
            "`memory_type_index` is {}, but the imported hardware buffer only allows the memory \
            types {:#b}",
            allocate_info.memory_type_index, properties.memory_type_bits,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_import_blob(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let Some((buffer, _)) = hardware_buffer_import(ctx, allocate_info) else {
        return Ok(());
    };

    if matches!(
        allocate_info.dedicated_allocation,
        Some(DedicatedAllocation::Image(_))
    ) {
        return Ok(());
    }

    let desc = buffer.desc();

    if desc.format != HardwareBufferFormat::Blob
        || !desc.usage.intersects(HardwareBufferUsage::GPU_DATA_BUFFER)
    {
        return Err(Violation::new(format!(
            "the allocation imports a hardware buffer without being dedicated to an image, but \
            the hardware buffer has format {:?} and usage {:?} instead of a blob format with \
            GPU data buffer usage",
            desc.format, desc.usage,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_import_gpu_usage(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let Some((buffer, _)) = hardware_buffer_import(ctx, allocate_info) else {
        return Ok(());
    };

    if !buffer.desc().usage.intersects(HardwareBufferUsage::GPU_ANY) {
        return Err(Violation::new(format!(
            "the imported hardware buffer has usage {:?}, which contains no GPU usage",
            buffer.desc().usage,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_dedicated_format(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let (Some((_, properties)), Some(image)) = (
        hardware_buffer_import(ctx, allocate_info),
        dedicated_image(ctx, allocate_info),
    ) else {
        return Ok(());
    };

    let matches = match image.external_format() {
        Some(external_format) => properties.external_format == Some(external_format),
        None => image.format() == properties.format,
    };

    if !matches {
        return Err(Violation::new(format!(
            "the dedicated image has format {:?} and external format {:?}, which doesn't match \
            the format {:?} of the imported hardware buffer",
            image.format(),
            image.external_format(),
            properties.format,
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_dedicated_extent(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let (Some((buffer, _)), Some(image)) = (
        hardware_buffer_import(ctx, allocate_info),
        dedicated_image(ctx, allocate_info),
    ) else {
        return Ok(());
    };

    let desc = buffer.desc();

    if image.extent() != [desc.width, desc.height, 1] || image.array_layers() != desc.layers {
        return Err(Violation::new(format!(
            "the dedicated image has extent {:?} and {} array layers, but the imported hardware \
            buffer is {}x{} with {} layers",
            image.extent(),
            image.array_layers(),
            desc.width,
            desc.height,
            desc.layers,
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_dedicated_mip_levels(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let (Some((buffer, _)), Some(image)) = (
        hardware_buffer_import(ctx, allocate_info),
        dedicated_image(ctx, allocate_info),
    ) else {
        return Ok(());
    };

    let mipmap_complete = buffer
        .desc()
        .usage
        .intersects(HardwareBufferUsage::GPU_MIPMAP_COMPLETE);
    let full_chain = max_mip_levels(image.extent());

    if mipmap_complete {
        if image.mip_levels() != 1 && image.mip_levels() != full_chain {
            return Err(Violation::new(format!(
                "the imported hardware buffer has a complete mip chain, but the dedicated image \
                has {} mip levels instead of 1 or {full_chain}",
                image.mip_levels(),
            ))
            .object(image.id())
            .into());
        }
    } else if image.mip_levels() != 1 {
        return Err(Violation::new(format!(
            "the imported hardware buffer has no mip chain, but the dedicated image has {} mip \
            levels",
            image.mip_levels(),
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_dedicated_usage(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let (Some((buffer, _)), Some(image)) = (
        hardware_buffer_import(ctx, allocate_info),
        dedicated_image(ctx, allocate_info),
    ) else {
        return Ok(());
    };

    let buffer_usage = buffer.desc().usage;
    let mut violations = Violations::new();

    for (image_usage, required) in [
        (
            ImageUsage::SAMPLED | ImageUsage::INPUT_ATTACHMENT,
            HardwareBufferUsage::GPU_SAMPLED_IMAGE,
        ),
        (
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::DEPTH_STENCIL_ATTACHMENT,
            HardwareBufferUsage::GPU_FRAMEBUFFER,
        ),
    ] {
        if image.usage().intersects(image_usage) && !buffer_usage.contains(required) {
            violations.push(
                Violation::new(format!(
                    "the dedicated image has usage {:?}, which requires the imported hardware \
                    buffer to have usage {required:?}, but it has {buffer_usage:?}",
                    image.usage().intersection(image_usage),
                ))
                .object(image.id()),
            );
        }
    }

    if image.flags().intersects(ImageCreateFlags::CUBE_COMPATIBLE)
        && !buffer_usage.contains(HardwareBufferUsage::GPU_CUBE_MAP)
    {
        violations.push(
            Violation::new(
                "the dedicated image is cube compatible, but the imported hardware buffer \
                doesn't have cube map usage",
            )
            .object(image.id()),
        );
    }

    violations.into_result()
}

pub(crate) fn fd_import(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let Some(MemoryImport::Fd { fd, .. }) = &allocate_info.import else {
        return Ok(());
    };

    let Some(exported) = ctx.resources().exported_fd(*fd) else {
        return Err(Violation::new(format!(
            "file descriptor {} was not exported from an allocation, or was already imported",
            fd.fd,
        ))
        .into());
    };

    if exported.allocation_size != allocate_info.allocation_size
        || exported.memory_type_index != allocate_info.memory_type_index
    {
        return Err(Violation::new(format!(
            "the allocation has size {} and memory type {}, but the memory exported to file \
            descriptor {} has size {} and memory type {}",
            allocate_info.allocation_size,
            allocate_info.memory_type_index,
            fd.fd,
            exported.allocation_size,
            exported.memory_type_index,
        ))
        .object(exported.memory)
        .into());
    }

    Ok(())
}

fn dedicated_size_exempt(allocate_info: &MemoryAllocateInfo) -> bool {
    exports_hardware_buffer_for_image(allocate_info)
        || matches!(
            allocate_info.import,
            Some(MemoryImport::AndroidHardwareBuffer(_))
        )
}

pub(crate) fn dedicated_image_size(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let Some(image) = dedicated_image(ctx, allocate_info) else {
        return Ok(());
    };

    if dedicated_size_exempt(allocate_info) || image.has_deferred_requirements() {
        return Ok(());
    }

    let requirements = image.memory_requirements(ctx.environment());

    if allocate_info.allocation_size != requirements.size {
        return Err(Violation::new(format!(
            "the allocation is dedicated to an image requiring {} bytes, but `allocation_size` \
            is {}",
            requirements.size, allocate_info.allocation_size,
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn dedicated_buffer_size(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(allocate_info) = allocate_info(ctx) else {
        return Ok(());
    };
    let Some(DedicatedAllocation::Buffer(buffer)) = allocate_info.dedicated_allocation else {
        return Ok(());
    };
    let Ok(buffer) = ctx.resources().get(buffer) else {
        return Ok(());
    };

    if dedicated_size_exempt(allocate_info) {
        return Ok(());
    }

    let requirements = buffer.memory_requirements(ctx.environment());

    if allocate_info.allocation_size != requirements.size {
        return Err(Violation::new(format!(
            "the allocation is dedicated to a buffer requiring {} bytes, but `allocation_size` \
            is {}",
            requirements.size, allocate_info.allocation_size,
        ))
        .object(buffer.id())
        .into());
    }

    Ok(())
}

pub(crate) fn fd_export_declared(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::ExportMemoryFd {
        memory,
        handle_type,
    } = ctx.operation()
    else {
        return Ok(());
    };
    let Ok(memory) = ctx.resources().get(*memory) else {
        return Ok(());
    };

    if !memory.export_handle_types().contains(*handle_type) {
        return Err(Violation::new(format!(
            "`handle_type` is {handle_type:?}, but the allocation was only created with export \
            handle types {:?}",
            memory.export_handle_types(),
        ))
        .object(memory.id())
        .into());
    }

    Ok(())
}

pub(crate) fn fd_export_handle_type(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::ExportMemoryFd { handle_type, .. } = ctx.operation() else {
        return Ok(());
    };

    if *handle_type != ExternalMemoryHandleTypes::OPAQUE_FD
        && *handle_type != ExternalMemoryHandleTypes::DMA_BUF
    {
        return Err(Violation::new(format!(
            "`handle_type` is {handle_type:?}, which is not a file descriptor handle type",
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_valid(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::GetHardwareBufferProperties(buffer) = ctx.operation() else {
        return Ok(());
    };

    if !buffer.desc().usage.intersects(HardwareBufferUsage::GPU_ANY) {
        return Err(Violation::new(format!(
            "the hardware buffer has usage {:?}, which contains no GPU usage",
            buffer.desc().usage,
        ))
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::{BufferCreateInfo, BufferUsage},
        environment::HardwareBufferDesc,
        format::Format,
        image::ImageCreateInfo,
        tests::color_image_info,
        ErrorKind,
    };
    use std::num::NonZero;

    fn sampled_rgba(device: &crate::device::Device) -> Arc<HardwareBuffer> {
        device
            .environment()
            .allocate_hardware_buffer(HardwareBufferDesc {
                width: 64,
                height: 64,
                layers: 1,
                format: HardwareBufferFormat::R8G8B8A8Unorm,
                usage: HardwareBufferUsage::GPU_SAMPLED_IMAGE,
            })
            .unwrap()
    }

    #[test]
    fn memory_type_out_of_range() {
        let (device, monitor) = test_device!();

        monitor.expect("VUID-VkMemoryAllocateInfo-memoryTypeIndex-01714");
        assert!(device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: 1024,
                    memory_type_index: 4,
                    ..Default::default()
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect("VUID-VkMemoryAllocateInfo-allocationSize-00638");
        assert!(device
            .allocate_memory(&monitor, MemoryAllocateInfo::default())
            .is_err());
        monitor.verify_found().unwrap();
    }

    // The allocation size of an import must match the size reported by the properties query.
    #[test]
    fn hardware_buffer_import_size() {
        let (device, monitor) = android_device!();
        let buffer = sampled_rgba(&device);
        let properties = device.hardware_buffer_properties(&monitor, &buffer).unwrap();

        let image = device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    external_memory_handle_types: ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [64, 64, 1])
                },
            )
            .unwrap();

        monitor.expect("VUID-VkMemoryAllocateInfo-allocationSize-02383");
        let err = device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: properties.allocation_size + 1,
                    memory_type_index: 0,
                    dedicated_allocation: Some(DedicatedAllocation::Image(image)),
                    import: Some(MemoryImport::AndroidHardwareBuffer(buffer.clone())),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImportMismatch);
        monitor.verify_found().unwrap();

        monitor.expect_success();
        device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: properties.allocation_size,
                    memory_type_index: 0,
                    dedicated_allocation: Some(DedicatedAllocation::Image(image)),
                    import: Some(MemoryImport::AndroidHardwareBuffer(buffer)),
                    ..Default::default()
                },
            )
            .unwrap();
        monitor.verify_found().unwrap();
    }

    #[test]
    fn hardware_buffer_import_without_image() {
        let (device, monitor) = android_device!();
        let buffer = sampled_rgba(&device);
        let properties = device.hardware_buffer_properties(&monitor, &buffer).unwrap();

        monitor.expect("VUID-VkMemoryAllocateInfo-pNext-02384");
        monitor.expect("VUID-VkMemoryAllocateInfo-memoryTypeIndex-02385");
        assert!(device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: properties.allocation_size,
                    memory_type_index: 1,
                    import: Some(MemoryImport::AndroidHardwareBuffer(buffer)),
                    ..Default::default()
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn hardware_buffer_dedicated_mismatch() {
        let (device, monitor) = android_device!();
        let buffer = sampled_rgba(&device);
        let properties = device.hardware_buffer_properties(&monitor, &buffer).unwrap();

        let image = device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    mip_levels: 7,
                    usage: ImageUsage::SAMPLED | ImageUsage::COLOR_ATTACHMENT,
                    external_memory_handle_types: ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER,
                    ..color_image_info(Format::B8G8R8A8_UNORM, [32, 64, 1])
                },
            )
            .unwrap();

        monitor.expect("VUID-VkMemoryAllocateInfo-pNext-02387");
        monitor.expect("VUID-VkMemoryAllocateInfo-pNext-02388");
        monitor.expect("VUID-VkMemoryAllocateInfo-pNext-02389");
        monitor.expect("VUID-VkMemoryAllocateInfo-pNext-02390");
        assert!(device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: properties.allocation_size,
                    dedicated_allocation: Some(DedicatedAllocation::Image(image)),
                    import: Some(MemoryImport::AndroidHardwareBuffer(buffer)),
                    ..Default::default()
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn hardware_buffer_without_gpu_usage() {
        let (device, monitor) = android_device!();
        let buffer = device
            .environment()
            .allocate_hardware_buffer(HardwareBufferDesc {
                width: 64,
                height: 1,
                layers: 1,
                format: HardwareBufferFormat::Blob,
                usage: HardwareBufferUsage::CPU_READ_OFTEN,
            })
            .unwrap();

        monitor.expect("VUID-vkGetAndroidHardwareBufferPropertiesANDROID-buffer-01884");
        assert!(device.hardware_buffer_properties(&monitor, &buffer).is_err());
        monitor.verify_found().unwrap();

        monitor.expect("VUID-VkMemoryAllocateInfo-pNext-02386");
        monitor.set_unexpected_error("VUID-VkMemoryAllocateInfo-pNext-02384");
        assert!(device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: 4096,
                    import: Some(MemoryImport::AndroidHardwareBuffer(buffer)),
                    ..Default::default()
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn hardware_buffer_export_size() {
        let (device, monitor) = android_device!();
        let image = device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    external_memory_handle_types: ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [64, 64, 1])
                },
            )
            .unwrap();

        monitor.expect("VUID-VkMemoryAllocateInfo-pNext-01874");
        assert!(device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: 64,
                    dedicated_allocation: Some(DedicatedAllocation::Image(image)),
                    export_handle_types: ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER,
                    ..Default::default()
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect_success();
        let memory = device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    dedicated_allocation: Some(DedicatedAllocation::Image(image)),
                    export_handle_types: ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER,
                    ..Default::default()
                },
            )
            .unwrap();
        monitor.verify_found().unwrap();
        assert!(device.resources().get(memory).unwrap().allocation_size() > 0);
    }

    #[test]
    fn external_format_image_import() {
        let (device, monitor) = android_device!();
        let buffer = device
            .environment()
            .allocate_hardware_buffer(HardwareBufferDesc {
                width: 64,
                height: 64,
                layers: 1,
                format: HardwareBufferFormat::Y8Cb8Cr8_420,
                usage: HardwareBufferUsage::GPU_SAMPLED_IMAGE,
            })
            .unwrap();
        let properties = device.hardware_buffer_properties(&monitor, &buffer).unwrap();

        monitor.expect_success();
        let image = device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    external_format: properties.external_format,
                    usage: ImageUsage::SAMPLED,
                    external_memory_handle_types: ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER,
                    ..color_image_info(Format::UNDEFINED, [64, 64, 1])
                },
            )
            .unwrap();
        device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: properties.allocation_size,
                    dedicated_allocation: Some(DedicatedAllocation::Image(image)),
                    import: Some(MemoryImport::AndroidHardwareBuffer(buffer)),
                    ..Default::default()
                },
            )
            .unwrap();
        monitor.verify_found().unwrap();

        // An unrelated external format is rejected.
        monitor.expect("VUID-VkExternalFormatANDROID-externalFormat-01894");
        assert!(device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    external_format: NonZero::new(7),
                    usage: ImageUsage::SAMPLED,
                    ..color_image_info(Format::UNDEFINED, [64, 64, 1])
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn dedicated_sizes() {
        let (device, monitor) = test_device!();
        let buffer = device
            .create_buffer(
                &monitor,
                BufferCreateInfo {
                    size: 1000,
                    usage: BufferUsage::UNIFORM_BUFFER,
                    ..Default::default()
                },
            )
            .unwrap();

        monitor.expect("VUID-VkMemoryDedicatedAllocateInfo-buffer-01435");
        assert!(device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: 4096,
                    dedicated_allocation: Some(DedicatedAllocation::Buffer(buffer)),
                    ..Default::default()
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        let image = device
            .create_image(&monitor, color_image_info(Format::R8G8B8A8_UNORM, [16, 16, 1]))
            .unwrap();

        monitor.expect("VUID-VkMemoryDedicatedAllocateInfo-image-01433");
        assert!(device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: 1,
                    dedicated_allocation: Some(DedicatedAllocation::Image(image)),
                    ..Default::default()
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn fd_export_and_import() {
        let (device, monitor) = test_device!();

        monitor.expect_success();
        let exported = device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: 4096,
                    export_handle_types: ExternalMemoryHandleTypes::OPAQUE_FD,
                    ..Default::default()
                },
            )
            .unwrap();
        let plain = device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: 4096,
                    ..Default::default()
                },
            )
            .unwrap();
        let fd = device
            .export_memory_fd(&monitor, exported, ExternalMemoryHandleTypes::OPAQUE_FD)
            .unwrap();
        monitor.verify_found().unwrap();

        monitor.expect("VUID-VkMemoryGetFdInfoKHR-handleType-00671");
        assert!(device
            .export_memory_fd(&monitor, plain, ExternalMemoryHandleTypes::OPAQUE_FD)
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect("VUID-VkMemoryAllocateInfo-allocationSize-01742");
        assert!(device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: 8192,
                    import: Some(MemoryImport::Fd {
                        handle_type: ExternalMemoryHandleTypes::OPAQUE_FD,
                        fd,
                    }),
                    ..Default::default()
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect_success();
        let imported = device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: 4096,
                    import: Some(MemoryImport::Fd {
                        handle_type: ExternalMemoryHandleTypes::OPAQUE_FD,
                        fd,
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        monitor.verify_found().unwrap();
        assert_eq!(
            device
                .resources()
                .get(imported)
                .unwrap()
                .import()
                .map(MemoryImport::handle_type),
            Some(ExternalMemoryHandleTypes::OPAQUE_FD),
        );

        // The descriptor was consumed by the import.
        monitor.expect("VUID-VkMemoryAllocateInfo-allocationSize-01742");
        assert!(device
            .allocate_memory(
                &monitor,
                MemoryAllocateInfo {
                    allocation_size: 4096,
                    import: Some(MemoryImport::Fd {
                        handle_type: ExternalMemoryHandleTypes::OPAQUE_FD,
                        fd,
                    }),
                    ..Default::default()
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }
}
