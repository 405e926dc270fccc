//! Pipeline barriers, sharing modes and queue family ownership transfers.
//!
//! A barrier recorded into a command buffer may do two things besides ordering accesses: it can
//! transition the layout of image subresources, and it can transfer ownership of an exclusively
//! shared resource from one queue family to another. The rules in this module check the barrier
//! itself. Whether the transitions and transfers are consistent with the state of the resources
//! is checked by the [tracker].
//!
//! [tracker]: crate::tracker

use crate::{
    buffer::Buffer,
    environment::Environment,
    image::{Image, ImageLayout, ImageSubresourceRange},
    macros::vulkan_bitflags,
    rules::{Operation, RuleContext, RuleResult, Violation, Violations},
    DeviceSize, Id, NonExhaustive,
};
use smallvec::SmallVec;
use std::ops::Range;

/// The special queue family index that refers to a queue family outside the current instance,
/// but using the same underlying device.
pub const QUEUE_FAMILY_EXTERNAL: u32 = ash::vk::QUEUE_FAMILY_EXTERNAL;

/// The special queue family index that refers to a queue family of a foreign device.
pub const QUEUE_FAMILY_FOREIGN: u32 = ash::vk::QUEUE_FAMILY_FOREIGN_EXT;

vulkan_bitflags! {
    /// A set of stages in the device's processing pipeline.
    PipelineStages = PipelineStageFlags(u32);

    TOP_OF_PIPE = TOP_OF_PIPE,
    DRAW_INDIRECT = DRAW_INDIRECT,
    VERTEX_INPUT = VERTEX_INPUT,
    VERTEX_SHADER = VERTEX_SHADER,
    FRAGMENT_SHADER = FRAGMENT_SHADER,
    EARLY_FRAGMENT_TESTS = EARLY_FRAGMENT_TESTS,
    LATE_FRAGMENT_TESTS = LATE_FRAGMENT_TESTS,
    COLOR_ATTACHMENT_OUTPUT = COLOR_ATTACHMENT_OUTPUT,
    COMPUTE_SHADER = COMPUTE_SHADER,

    /// Copy, blit, resolve and clear commands, outside of a render pass.
    ALL_TRANSFER = TRANSFER,

    BOTTOM_OF_PIPE = BOTTOM_OF_PIPE,
    HOST = HOST,
    ALL_GRAPHICS = ALL_GRAPHICS,
    ALL_COMMANDS = ALL_COMMANDS,
}

vulkan_bitflags! {
    /// A set of memory access types that are included in a memory dependency.
    AccessFlags = AccessFlags(u32);

    INPUT_ATTACHMENT_READ = INPUT_ATTACHMENT_READ,
    SHADER_READ = SHADER_READ,
    SHADER_WRITE = SHADER_WRITE,
    COLOR_ATTACHMENT_READ = COLOR_ATTACHMENT_READ,
    COLOR_ATTACHMENT_WRITE = COLOR_ATTACHMENT_WRITE,
    DEPTH_STENCIL_ATTACHMENT_READ = DEPTH_STENCIL_ATTACHMENT_READ,
    DEPTH_STENCIL_ATTACHMENT_WRITE = DEPTH_STENCIL_ATTACHMENT_WRITE,
    TRANSFER_READ = TRANSFER_READ,
    TRANSFER_WRITE = TRANSFER_WRITE,
    HOST_READ = HOST_READ,
    HOST_WRITE = HOST_WRITE,
    MEMORY_READ = MEMORY_READ,
    MEMORY_WRITE = MEMORY_WRITE,
}

/// Declares in which queue(s) a resource can be used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sharing<I> {
    /// The resource is used in only one queue family at a time, and must be transferred
    /// explicitly between queue families.
    Exclusive,

    /// The resource can be used in the listed queue families at the same time.
    Concurrent(I),
}

impl<I> Sharing<I>
where
    I: AsRef<[u32]>,
{
    /// Returns whether the resource can be used by `queue_family_index` without an ownership
    /// transfer. For exclusive sharing, this is always `true`, as ownership is tracked separately.
    pub fn allows(&self, queue_family_index: u32) -> bool {
        match self {
            Sharing::Exclusive => true,
            Sharing::Concurrent(indices) => indices.as_ref().contains(&queue_family_index),
        }
    }

    #[inline]
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Sharing::Exclusive)
    }
}

/// Specifies a queue family ownership transfer for a resource.
///
/// There are three classes of queues that can be used in an ownership transfer:
/// - A **local** queue exists on the current device.
/// - An **external** queue does not exist on the current device, but has the same underlying
///   device object.
/// - A **foreign** queue does not exist on the current device, and the underlying device object
///   is unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueFamilyOwnershipTransfer {
    /// For a resource with exclusive sharing mode, transfers ownership between two local queues.
    ExclusiveBetweenLocal {
        /// The queue family that currently owns the resource.
        src_index: u32,

        /// The queue family to transfer ownership to.
        dst_index: u32,
    },

    /// For a resource with exclusive sharing mode, transfers ownership from a local queue to an
    /// external queue.
    ExclusiveToExternal {
        /// The queue family that currently owns the resource.
        src_index: u32,
    },

    /// For a resource with exclusive sharing mode, transfers ownership from an external queue to
    /// a local queue.
    ExclusiveFromExternal {
        /// The queue family to transfer ownership to.
        dst_index: u32,
    },

    /// For a resource with exclusive sharing mode, transfers ownership from a local queue to a
    /// foreign queue.
    ExclusiveToForeign {
        /// The queue family that currently owns the resource.
        src_index: u32,
    },

    /// For a resource with exclusive sharing mode, transfers ownership from a foreign queue to a
    /// local queue.
    ExclusiveFromForeign {
        /// The queue family to transfer ownership to.
        dst_index: u32,
    },

    /// For a resource with concurrent sharing mode, transfers ownership from its local queues to
    /// an external queue.
    ConcurrentToExternal,

    /// For a resource with concurrent sharing mode, transfers ownership from an external queue to
    /// its local queues.
    ConcurrentFromExternal,

    /// For a resource with concurrent sharing mode, transfers ownership from its local queues to
    /// a foreign queue.
    ConcurrentToForeign,

    /// For a resource with concurrent sharing mode, transfers ownership from a foreign queue to
    /// its local queues.
    ConcurrentFromForeign,
}

impl QueueFamilyOwnershipTransfer {
    /// Returns the raw source and destination queue family indices of the transfer.
    pub fn indices(self) -> (u32, u32) {
        match self {
            Self::ExclusiveBetweenLocal {
                src_index,
                dst_index,
            } => (src_index, dst_index),
            Self::ExclusiveToExternal { src_index } => (src_index, QUEUE_FAMILY_EXTERNAL),
            Self::ExclusiveFromExternal { dst_index } => (QUEUE_FAMILY_EXTERNAL, dst_index),
            Self::ExclusiveToForeign { src_index } => (src_index, QUEUE_FAMILY_FOREIGN),
            Self::ExclusiveFromForeign { dst_index } => (QUEUE_FAMILY_FOREIGN, dst_index),
            Self::ConcurrentToExternal => (ash::vk::QUEUE_FAMILY_IGNORED, QUEUE_FAMILY_EXTERNAL),
            Self::ConcurrentFromExternal => (QUEUE_FAMILY_EXTERNAL, ash::vk::QUEUE_FAMILY_IGNORED),
            Self::ConcurrentToForeign => (ash::vk::QUEUE_FAMILY_IGNORED, QUEUE_FAMILY_FOREIGN),
            Self::ConcurrentFromForeign => (QUEUE_FAMILY_FOREIGN, ash::vk::QUEUE_FAMILY_IGNORED),
        }
    }

    /// Returns whether the transfer is for a resource with exclusive sharing mode.
    #[inline]
    pub fn is_exclusive(self) -> bool {
        matches!(
            self,
            Self::ExclusiveBetweenLocal { .. }
                | Self::ExclusiveToExternal { .. }
                | Self::ExclusiveFromExternal { .. }
                | Self::ExclusiveToForeign { .. }
                | Self::ExclusiveFromForeign { .. }
        )
    }

    /// Returns the local queue family indices that the transfer names.
    fn local_indices(self) -> SmallVec<[u32; 2]> {
        match self {
            Self::ExclusiveBetweenLocal {
                src_index,
                dst_index,
            } => SmallVec::from_slice(&[src_index, dst_index]),
            Self::ExclusiveToExternal { src_index } | Self::ExclusiveToForeign { src_index } => {
                SmallVec::from_slice(&[src_index])
            }
            Self::ExclusiveFromExternal { dst_index }
            | Self::ExclusiveFromForeign { dst_index } => SmallVec::from_slice(&[dst_index]),
            _ => SmallVec::new(),
        }
    }
}

/// A memory barrier that is applied to a single image.
#[derive(Clone, Debug)]
pub struct ImageMemoryBarrier {
    /// The default value is [`PipelineStages::empty()`].
    pub src_stages: PipelineStages,

    /// The default value is [`AccessFlags::empty()`].
    pub src_access: AccessFlags,

    /// The default value is [`PipelineStages::empty()`].
    pub dst_stages: PipelineStages,

    /// The default value is [`AccessFlags::empty()`].
    pub dst_access: AccessFlags,

    /// The layout that the subresources are expected to be in. [`ImageLayout::Undefined`]
    /// discards the contents and matches any layout.
    ///
    /// The default value is [`ImageLayout::Undefined`].
    pub old_layout: ImageLayout,

    /// The layout that the subresources are transitioned to.
    ///
    /// The default value is [`ImageLayout::Undefined`], which must be overridden.
    pub new_layout: ImageLayout,

    /// The queue family ownership transfer that is performed, if any.
    ///
    /// The default value is `None`.
    pub queue_family_ownership_transfer: Option<QueueFamilyOwnershipTransfer>,

    /// The image to apply the barrier to.
    pub image: Id<Image>,

    /// The subresources of the image to apply the barrier to.
    pub subresource_range: ImageSubresourceRange,

    pub _ne: NonExhaustive,
}

impl ImageMemoryBarrier {
    /// Returns an `ImageMemoryBarrier` for the first subresource of the color aspect of `image`,
    /// with the other fields set to their defaults.
    #[inline]
    pub fn image(image: Id<Image>) -> Self {
        ImageMemoryBarrier {
            src_stages: PipelineStages::empty(),
            src_access: AccessFlags::empty(),
            dst_stages: PipelineStages::empty(),
            dst_access: AccessFlags::empty(),
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::Undefined,
            queue_family_ownership_transfer: None,
            image,
            subresource_range: ImageSubresourceRange {
                aspects: crate::image::ImageAspects::COLOR,
                mip_levels: 0..1,
                array_layers: 0..1,
            },
            _ne: NonExhaustive(()),
        }
    }
}

/// A memory barrier that is applied to a single buffer.
#[derive(Clone, Debug)]
pub struct BufferMemoryBarrier {
    pub src_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_stages: PipelineStages,
    pub dst_access: AccessFlags,
    pub queue_family_ownership_transfer: Option<QueueFamilyOwnershipTransfer>,

    /// The buffer to apply the barrier to.
    pub buffer: Id<Buffer>,

    /// The byte range of the buffer to apply the barrier to.
    ///
    /// The default value is `0..DeviceSize::MAX`, which covers the whole buffer.
    pub range: Range<DeviceSize>,

    pub _ne: NonExhaustive,
}

impl BufferMemoryBarrier {
    /// Returns a `BufferMemoryBarrier` for the whole of `buffer`, with the other fields set to
    /// their defaults.
    #[inline]
    pub fn buffer(buffer: Id<Buffer>) -> Self {
        BufferMemoryBarrier {
            src_stages: PipelineStages::empty(),
            src_access: AccessFlags::empty(),
            dst_stages: PipelineStages::empty(),
            dst_access: AccessFlags::empty(),
            queue_family_ownership_transfer: None,
            buffer,
            range: 0..DeviceSize::MAX,
            _ne: NonExhaustive(()),
        }
    }
}

/// Dependency info for barriers in a pipeline barrier command.
#[derive(Clone, Debug)]
pub struct DependencyInfo {
    /// The default value is empty.
    pub image_memory_barriers: SmallVec<[ImageMemoryBarrier; 2]>,

    /// The default value is empty.
    pub buffer_memory_barriers: SmallVec<[BufferMemoryBarrier; 1]>,

    pub _ne: NonExhaustive,
}

impl Default for DependencyInfo {
    #[inline]
    fn default() -> Self {
        DependencyInfo {
            image_memory_barriers: SmallVec::new(),
            buffer_memory_barriers: SmallVec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

pub(crate) fn check_concurrent_family_count(sharing: &Sharing<SmallVec<[u32; 4]>>) -> RuleResult {
    if let Sharing::Concurrent(indices) = sharing {
        if indices.len() < 2 {
            return Err(Violation::new(
                "`sharing` is `Sharing::Concurrent`, but contains fewer than 2 queue family \
                indices",
            )
            .into());
        }
    }

    Ok(())
}

pub(crate) fn check_concurrent_family_indices(
    environment: &Environment,
    sharing: &Sharing<SmallVec<[u32; 4]>>,
) -> RuleResult {
    let Sharing::Concurrent(indices) = sharing else {
        return Ok(());
    };

    let family_count = environment.queue_family_properties().len() as u32;

    for (index, &queue_family_index) in indices.iter().enumerate() {
        if queue_family_index >= family_count {
            return Err(Violation::new(format!(
                "`sharing[{index}]` is {queue_family_index}, which is not less than the number \
                of queue families ({family_count})",
            ))
            .into());
        }

        if indices[..index].contains(&queue_family_index) {
            return Err(Violation::new(format!(
                "`sharing` contains queue family index {queue_family_index} more than once",
            ))
            .into());
        }
    }

    Ok(())
}

fn dependency_info<'a>(ctx: &'a RuleContext<'_>) -> Option<&'a DependencyInfo> {
    match ctx.operation() {
        Operation::PipelineBarrier(dependency_info) => Some(dependency_info),
        _ => None,
    }
}

pub(crate) fn barrier_new_layout(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(dependency_info) = dependency_info(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (barrier_index, barrier) in dependency_info.image_memory_barriers.iter().enumerate() {
        if matches!(
            barrier.new_layout,
            ImageLayout::Undefined | ImageLayout::Preinitialized
        ) {
            violations.push(
                Violation::new(format!(
                    "`image_memory_barriers[{barrier_index}].new_layout` is `{:?}`",
                    barrier.new_layout,
                ))
                .object(barrier.image),
            );
        }
    }

    violations.into_result()
}

fn sharing_mismatch_message(
    field: &str,
    exclusive_resource: bool,
    transfer: QueueFamilyOwnershipTransfer,
) -> String {
    if exclusive_resource {
        format!(
            "`{field}.queue_family_ownership_transfer` is `{transfer:?}`, but the resource has \
            exclusive sharing",
        )
    } else {
        format!(
            "`{field}.queue_family_ownership_transfer` is `{transfer:?}`, but the resource has \
            concurrent sharing",
        )
    }
}

pub(crate) fn image_barrier_sharing(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(dependency_info) = dependency_info(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (barrier_index, barrier) in dependency_info.image_memory_barriers.iter().enumerate() {
        let (Some(transfer), Ok(image)) = (
            barrier.queue_family_ownership_transfer,
            ctx.resources().get(barrier.image),
        ) else {
            continue;
        };

        let exclusive = image.sharing().is_exclusive();

        if transfer.is_exclusive() != exclusive {
            violations.push(
                Violation::new(sharing_mismatch_message(
                    &format!("image_memory_barriers[{barrier_index}]"),
                    exclusive,
                    transfer,
                ))
                .object(barrier.image),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn buffer_barrier_sharing(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(dependency_info) = dependency_info(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (barrier_index, barrier) in dependency_info.buffer_memory_barriers.iter().enumerate() {
        let (Some(transfer), Ok(buffer)) = (
            barrier.queue_family_ownership_transfer,
            ctx.resources().get(barrier.buffer),
        ) else {
            continue;
        };

        let exclusive = buffer.sharing().is_exclusive();

        if transfer.is_exclusive() != exclusive {
            violations.push(
                Violation::new(sharing_mismatch_message(
                    &format!("buffer_memory_barriers[{barrier_index}]"),
                    exclusive,
                    transfer,
                ))
                .object(barrier.buffer),
            );
        }
    }

    violations.into_result()
}

fn check_transfer_indices(
    ctx: &RuleContext<'_>,
    field: &str,
    transfer: Option<QueueFamilyOwnershipTransfer>,
    object: Id,
) -> Option<Violation> {
    let family_count = ctx.environment().queue_family_properties().len() as u32;

    transfer?
        .local_indices()
        .into_iter()
        .find(|&index| index >= family_count)
        .map(|index| {
            Violation::new(format!(
                "`{field}.queue_family_ownership_transfer` names queue family {index}, which is \
                not less than the number of queue families ({family_count})",
            ))
            .object(object)
        })
}

pub(crate) fn image_barrier_family_index(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(dependency_info) = dependency_info(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (barrier_index, barrier) in dependency_info.image_memory_barriers.iter().enumerate() {
        violations.extend(check_transfer_indices(
            ctx,
            &format!("image_memory_barriers[{barrier_index}]"),
            barrier.queue_family_ownership_transfer,
            barrier.image.erase(),
        ));
    }

    violations.into_result()
}

pub(crate) fn buffer_barrier_family_index(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(dependency_info) = dependency_info(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (barrier_index, barrier) in dependency_info.buffer_memory_barriers.iter().enumerate() {
        violations.extend(check_transfer_indices(
            ctx,
            &format!("buffer_memory_barriers[{barrier_index}]"),
            barrier.queue_family_ownership_transfer,
            barrier.buffer.erase(),
        ));
    }

    violations.into_result()
}

fn in_render_pass(ctx: &RuleContext<'_>) -> bool {
    ctx.recording()
        .is_some_and(|recording| recording.render_pass().is_some())
}

pub(crate) fn barrier_layout_in_render_pass(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(dependency_info) = dependency_info(ctx) else {
        return Ok(());
    };

    if !in_render_pass(ctx) {
        return Ok(());
    }

    let mut violations = Violations::new();

    for (barrier_index, barrier) in dependency_info.image_memory_barriers.iter().enumerate() {
        if barrier.old_layout != barrier.new_layout {
            violations.push(
                Violation::new(format!(
                    "the barrier is recorded inside a render pass instance, but \
                    `image_memory_barriers[{barrier_index}]` performs a layout transition",
                ))
                .object(barrier.image),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn barrier_ownership_in_render_pass(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(dependency_info) = dependency_info(ctx) else {
        return Ok(());
    };

    if !in_render_pass(ctx) {
        return Ok(());
    }

    let mut violations = Violations::new();

    for (barrier_index, barrier) in dependency_info.image_memory_barriers.iter().enumerate() {
        if barrier.queue_family_ownership_transfer.is_some() {
            violations.push(
                Violation::new(format!(
                    "the barrier is recorded inside a render pass instance, but \
                    `image_memory_barriers[{barrier_index}]` performs a queue family ownership \
                    transfer",
                ))
                .object(barrier.image),
            );
        }
    }

    for (barrier_index, barrier) in dependency_info.buffer_memory_barriers.iter().enumerate() {
        if barrier.queue_family_ownership_transfer.is_some() {
            violations.push(
                Violation::new(format!(
                    "the barrier is recorded inside a render pass instance, but \
                    `buffer_memory_barriers[{barrier_index}]` performs a queue family ownership \
                    transfer",
                ))
                .object(barrier.buffer),
            );
        }
    }

    violations.into_result()
}
