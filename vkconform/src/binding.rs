//! Binding memory to images and buffers, and querying their memory requirements.
//!
//! The memory requirements of a resource are derived from its create info and the properties of
//! the [`Environment`], following a simplified model of what implementations report:
//!
//! - The size of an image is the sum, over its mip levels, of the number of texels times the
//!   texel size, times the number of array layers and samples. The size of a buffer is its size
//!   rounded up to a multiple of 4. Both are then rounded up to the alignment.
//! - The alignment is [`Environment::optimal_image_alignment`] or
//!   [`Environment::linear_image_alignment`] for images, depending on their tiling, and
//!   [`Environment::buffer_alignment`] for buffers.
//! - Every memory type that is not protected is allowed. Lazily allocated memory types are only
//!   allowed for images with the `TRANSIENT_ATTACHMENT` usage.
//!
//! Images that are backed by Android hardware buffers have *deferred* requirements: they are only
//! known once the imported memory has been bound. Querying them before that is a
//! [`QueryBeforeBind`] error, and binding such an image skips the checks that depend on them.
//!
//! [`QueryBeforeBind`]: crate::ErrorKind::QueryBeforeBind

use crate::{
    buffer::Buffer,
    environment::Environment,
    image::{mip_level_extent, Image, ImageSubresource, ImageTiling, ImageUsage},
    memory::{
        DedicatedAllocation, DeviceMemory, ExternalMemoryHandleTypes, MemoryImport,
        MemoryPropertyFlags, MemoryRequirements,
    },
    rules::{Operation, RuleContext, RuleResult, Violation},
    DeviceSize, Object,
};
use std::sync::Arc;

/// A resource that memory can be bound to.
pub trait Bindable: Object {
    /// Returns the dedicated allocation that refers to this resource.
    fn dedicated_allocation(&self) -> DedicatedAllocation;

    /// Computes the memory requirements of the resource.
    fn memory_requirements(&self, environment: &Environment) -> MemoryRequirements;

    /// Returns the external memory handle types that the resource was created with.
    fn external_memory_handle_types(&self) -> ExternalMemoryHandleTypes;

    /// Returns whether the requirements are only known once memory has been bound.
    fn has_deferred_requirements(&self) -> bool;

    fn is_bound(&self) -> bool;
}

/// Rounds `value` up to a multiple of `alignment`, saturating at the largest multiple.
fn align_up(value: DeviceSize, alignment: DeviceSize) -> DeviceSize {
    let alignment = alignment.max(1);

    value
        .div_ceil(alignment)
        .checked_mul(alignment)
        .unwrap_or(DeviceSize::MAX / alignment * alignment)
}

/// Returns the size of one array layer of a mip level, saturating on overflow.
fn level_size(extent: [u32; 3], level: u32, block_size: DeviceSize) -> DeviceSize {
    mip_level_extent(extent, level)
        .into_iter()
        .fold(block_size, |size, e| size.saturating_mul(e as DeviceSize))
}

impl Bindable for Image {
    #[inline]
    fn dedicated_allocation(&self) -> DedicatedAllocation {
        DedicatedAllocation::Image(self.id())
    }

    fn memory_requirements(&self, environment: &Environment) -> MemoryRequirements {
        let alignment = if self.tiling() == ImageTiling::Linear {
            environment.linear_image_alignment()
        } else {
            environment.optimal_image_alignment()
        };

        // External formats have no block size that Vulkan knows of.
        let block_size = self.format().block_size().max(1);
        let size = (0..self.mip_levels())
            .map(|level| level_size(self.extent(), level, block_size))
            .fold(0, DeviceSize::saturating_add)
            .saturating_mul(self.array_layers() as DeviceSize)
            .saturating_mul(self.samples() as u32 as DeviceSize);

        let mut excluded = MemoryPropertyFlags::PROTECTED;

        if !self.usage().intersects(ImageUsage::TRANSIENT_ATTACHMENT) {
            excluded |= MemoryPropertyFlags::LAZILY_ALLOCATED;
        }

        MemoryRequirements {
            size: align_up(size, alignment),
            alignment,
            memory_type_bits: environment.memory_type_bits(MemoryPropertyFlags::empty(), excluded),
            requires_dedicated_allocation: self.has_deferred_requirements(),
        }
    }

    #[inline]
    fn external_memory_handle_types(&self) -> ExternalMemoryHandleTypes {
        Image::external_memory_handle_types(self)
    }

    #[inline]
    fn has_deferred_requirements(&self) -> bool {
        Image::has_deferred_requirements(self)
    }

    #[inline]
    fn is_bound(&self) -> bool {
        Image::is_bound(self)
    }
}

impl Bindable for Buffer {
    #[inline]
    fn dedicated_allocation(&self) -> DedicatedAllocation {
        DedicatedAllocation::Buffer(self.id())
    }

    fn memory_requirements(&self, environment: &Environment) -> MemoryRequirements {
        let alignment = environment.buffer_alignment();

        MemoryRequirements {
            size: align_up(align_up(self.size(), 4), alignment),
            alignment,
            memory_type_bits: environment.memory_type_bits(
                MemoryPropertyFlags::empty(),
                MemoryPropertyFlags::PROTECTED | MemoryPropertyFlags::LAZILY_ALLOCATED,
            ),
            requires_dedicated_allocation: false,
        }
    }

    #[inline]
    fn external_memory_handle_types(&self) -> ExternalMemoryHandleTypes {
        Buffer::external_memory_handle_types(self)
    }

    #[inline]
    fn has_deferred_requirements(&self) -> bool {
        false
    }

    #[inline]
    fn is_bound(&self) -> bool {
        Buffer::is_bound(self)
    }
}

/// The layout of a single subresource of an image with linear tiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceLayout {
    /// The offset of the subresource from the start of the image's memory.
    pub offset: DeviceSize,
    pub size: DeviceSize,
    pub row_pitch: DeviceSize,
    pub array_pitch: DeviceSize,
    pub depth_pitch: DeviceSize,
}

/// Computes the layout of a subresource of `image`, packed tightly in aspect, mip level and array
/// layer order.
pub fn subresource_layout(image: &Image, subresource: ImageSubresource) -> SubresourceLayout {
    let block_size = image.format().block_size().max(1);
    let layers = image.array_layers() as DeviceSize;
    let layer_size = |level| level_size(image.extent(), level, block_size);
    let levels_size = |levels: std::ops::Range<u32>| {
        levels
            .map(layer_size)
            .fold(0, DeviceSize::saturating_add)
            .saturating_mul(layers)
    };
    let aspect_size = levels_size(0..image.mip_levels());
    let aspect_index = image
        .aspects()
        .iter()
        .position(|aspect| aspect == subresource.aspect)
        .unwrap_or(0) as DeviceSize;

    let [width, height, _] = mip_level_extent(image.extent(), subresource.mip_level);
    let row_pitch = (width as DeviceSize).saturating_mul(block_size);
    let depth_pitch = row_pitch.saturating_mul(height as DeviceSize);
    let array_pitch = layer_size(subresource.mip_level);
    let level_offset = levels_size(0..subresource.mip_level);

    SubresourceLayout {
        offset: aspect_index
            .saturating_mul(aspect_size)
            .saturating_add(level_offset)
            .saturating_add((subresource.array_layer as DeviceSize).saturating_mul(array_pitch)),
        size: array_pitch,
        row_pitch,
        array_pitch,
        depth_pitch,
    }
}

/// A resource that memory is about to be bound to.
struct BindTarget<O> {
    resource: Arc<O>,
    memory: Arc<DeviceMemory>,
    offset: DeviceSize,
}

fn image_target(ctx: &RuleContext<'_>) -> Option<BindTarget<Image>> {
    let Operation::BindImageMemory {
        image,
        memory,
        offset,
    } = *ctx.operation()
    else {
        return None;
    };

    Some(BindTarget {
        resource: ctx.resources().get(image).ok()?,
        memory: ctx.resources().get(memory).ok()?,
        offset,
    })
}

fn buffer_target(ctx: &RuleContext<'_>) -> Option<BindTarget<Buffer>> {
    let Operation::BindBufferMemory {
        buffer,
        memory,
        offset,
    } = *ctx.operation()
    else {
        return None;
    };

    Some(BindTarget {
        resource: ctx.resources().get(buffer).ok()?,
        memory: ctx.resources().get(memory).ok()?,
        offset,
    })
}

fn check_not_bound<O: Bindable>(_: &RuleContext<'_>, target: &BindTarget<O>) -> RuleResult {
    if target.resource.is_bound() {
        return Err(Violation::new("memory is already bound to the resource")
            .object(target.resource.dedicated_allocation().id())
            .into());
    }

    Ok(())
}

fn check_offset_in_range<O: Bindable>(_: &RuleContext<'_>, target: &BindTarget<O>) -> RuleResult {
    if target.offset >= target.memory.allocation_size() {
        return Err(Violation::new(format!(
            "`memory_offset` is {}, which is not less than the size of the allocation ({})",
            target.offset,
            target.memory.allocation_size(),
        ))
        .object(target.memory.id())
        .into());
    }

    Ok(())
}

fn check_memory_type<O: Bindable>(ctx: &RuleContext<'_>, target: &BindTarget<O>) -> RuleResult {
    if target.resource.has_deferred_requirements() {
        return Ok(());
    }

    let requirements = target.resource.memory_requirements(ctx.environment());

    if requirements.memory_type_bits & (1 << target.memory.memory_type_index()) == 0 {
        return Err(Violation::new(format!(
            "the allocation has memory type {}, which is not in the allowed memory types of the \
            resource ({:#b})",
            target.memory.memory_type_index(),
            requirements.memory_type_bits,
        ))
        .object(target.resource.dedicated_allocation().id())
        .object(target.memory.id())
        .into());
    }

    Ok(())
}

fn check_offset_alignment<O: Bindable>(
    ctx: &RuleContext<'_>,
    target: &BindTarget<O>,
) -> RuleResult {
    let requirements = target.resource.memory_requirements(ctx.environment());

    if target.offset % requirements.alignment.max(1) != 0 {
        return Err(Violation::new(format!(
            "`memory_offset` is {}, which is not a multiple of the required alignment ({})",
            target.offset, requirements.alignment,
        ))
        .object(target.resource.dedicated_allocation().id())
        .into());
    }

    Ok(())
}

fn check_size<O: Bindable>(ctx: &RuleContext<'_>, target: &BindTarget<O>) -> RuleResult {
    if target.resource.has_deferred_requirements() {
        return Ok(());
    }

    let requirements = target.resource.memory_requirements(ctx.environment());

    if target.offset.saturating_add(requirements.size) > target.memory.allocation_size() {
        return Err(Violation::new(format!(
            "the resource requires {} bytes at offset {}, but the allocation is only {} bytes",
            requirements.size,
            target.offset,
            target.memory.allocation_size(),
        ))
        .object(target.resource.dedicated_allocation().id())
        .object(target.memory.id())
        .into());
    }

    Ok(())
}

fn check_requires_dedicated<O: Bindable>(
    ctx: &RuleContext<'_>,
    target: &BindTarget<O>,
) -> RuleResult {
    let requirements = target.resource.memory_requirements(ctx.environment());
    let dedicated = target.resource.dedicated_allocation();

    if requirements.requires_dedicated_allocation
        && target.memory.dedicated_allocation() != Some(dedicated)
    {
        return Err(Violation::new(
            "the resource requires a dedicated allocation, but the allocation is not dedicated \
            to it",
        )
        .object(dedicated.id())
        .object(target.memory.id())
        .into());
    }

    Ok(())
}

fn check_dedicated_mismatch<O: Bindable>(
    _: &RuleContext<'_>,
    target: &BindTarget<O>,
) -> RuleResult {
    let Some(dedicated) = target.memory.dedicated_allocation() else {
        return Ok(());
    };
    let own = target.resource.dedicated_allocation();

    if dedicated != own {
        return Err(Violation::new(format!(
            "the allocation is dedicated to {:?}, not to the resource",
            dedicated.id(),
        ))
        .object(own.id())
        .object(target.memory.id())
        .into());
    }

    if target.offset != 0 {
        return Err(Violation::new(format!(
            "the allocation is dedicated to the resource, but `memory_offset` is {}",
            target.offset,
        ))
        .object(own.id())
        .object(target.memory.id())
        .into());
    }

    Ok(())
}

fn check_hardware_buffer_handle_type<O: Bindable>(
    _: &RuleContext<'_>,
    target: &BindTarget<O>,
) -> RuleResult {
    if matches!(
        target.memory.import(),
        Some(MemoryImport::AndroidHardwareBuffer(_))
    ) && !target
        .resource
        .external_memory_handle_types()
        .intersects(ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER)
    {
        return Err(Violation::new(
            "the allocation imports an Android hardware buffer, but the resource was not created \
            with `ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER`",
        )
        .object(target.resource.dedicated_allocation().id())
        .object(target.memory.id())
        .into());
    }

    Ok(())
}

fn check_import_handle_type<O: Bindable>(
    _: &RuleContext<'_>,
    target: &BindTarget<O>,
) -> RuleResult {
    let Some(MemoryImport::Fd { handle_type, .. }) = target.memory.import() else {
        return Ok(());
    };

    if !target
        .resource
        .external_memory_handle_types()
        .intersects(*handle_type)
    {
        return Err(Violation::new(format!(
            "the allocation was imported with handle type {handle_type:?}, but the resource was \
            created with external memory handle types {:?}",
            target.resource.external_memory_handle_types(),
        ))
        .object(target.resource.dedicated_allocation().id())
        .object(target.memory.id())
        .into());
    }

    Ok(())
}

fn check_export_handle_type<O: Bindable>(
    _: &RuleContext<'_>,
    target: &BindTarget<O>,
) -> RuleResult {
    let export_handle_types = target.memory.export_handle_types();

    if !export_handle_types.is_empty()
        && !target
            .resource
            .external_memory_handle_types()
            .intersects(export_handle_types)
    {
        return Err(Violation::new(format!(
            "the allocation was created with export handle types {export_handle_types:?}, none \
            of which the resource was created with",
        ))
        .object(target.resource.dedicated_allocation().id())
        .object(target.memory.id())
        .into());
    }

    Ok(())
}

macro_rules! bind_rules {
    ($($image_rule:ident, $buffer_rule:ident => $check:ident;)*) => {
        $(
            pub(crate) fn $image_rule(ctx: &RuleContext<'_>) -> RuleResult {
                image_target(ctx).map_or(Ok(()), |target| $check(ctx, &target))
            }

            pub(crate) fn $buffer_rule(ctx: &RuleContext<'_>) -> RuleResult {
                buffer_target(ctx).map_or(Ok(()), |target| $check(ctx, &target))
            }
        )*
    };
}

bind_rules! {
    image_already_bound, buffer_already_bound => check_not_bound;
    image_offset_in_range, buffer_offset_in_range => check_offset_in_range;
    image_memory_type, buffer_memory_type => check_memory_type;
    image_offset_alignment, buffer_offset_alignment => check_offset_alignment;
    image_size, buffer_size => check_size;
    image_requires_dedicated, buffer_requires_dedicated => check_requires_dedicated;
    image_dedicated_mismatch, buffer_dedicated_mismatch => check_dedicated_mismatch;
    image_hardware_buffer_handle_type, buffer_hardware_buffer_handle_type =>
        check_hardware_buffer_handle_type;
    image_import_handle_type, buffer_import_handle_type => check_import_handle_type;
    image_export_handle_type, buffer_export_handle_type => check_export_handle_type;
}

fn check_deferred_bound(ctx: &RuleContext<'_>, image: crate::Id<Image>) -> RuleResult {
    let Ok(image) = ctx.resources().get(image) else {
        return Ok(());
    };

    if image.has_deferred_requirements() && !image.is_bound() {
        return Err(Violation::new(
            "the image was created with `ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER`, \
            and its memory requirements are only known once memory has been bound to it",
        )
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn requirements_before_bind(ctx: &RuleContext<'_>) -> RuleResult {
    match *ctx.operation() {
        Operation::GetImageMemoryRequirements {
            image,
            extended: false,
        } => check_deferred_bound(ctx, image),
        _ => Ok(()),
    }
}

pub(crate) fn requirements2_before_bind(ctx: &RuleContext<'_>) -> RuleResult {
    match *ctx.operation() {
        Operation::GetImageMemoryRequirements {
            image,
            extended: true,
        } => check_deferred_bound(ctx, image),
        _ => Ok(()),
    }
}

pub(crate) fn subresource_layout_before_bind(ctx: &RuleContext<'_>) -> RuleResult {
    match *ctx.operation() {
        Operation::GetImageSubresourceLayout { image, .. } => check_deferred_bound(ctx, image),
        _ => Ok(()),
    }
}

pub(crate) fn subresource_layout_tiling(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::GetImageSubresourceLayout { image, .. } = *ctx.operation() else {
        return Ok(());
    };
    let Ok(image) = ctx.resources().get(image) else {
        return Ok(());
    };

    if image.tiling() != ImageTiling::Linear {
        return Err(Violation::new(format!(
            "the image has tiling {:?}, but the layout of subresources is only defined for \
            `ImageTiling::Linear`",
            image.tiling(),
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}
