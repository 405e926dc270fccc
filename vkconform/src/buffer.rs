//! Buffers and the rules that apply when they are created.

use crate::{
    macros::vulkan_bitflags,
    memory::{ExternalMemoryHandleTypes, MemoryBinding},
    rules::{Operation, RuleContext, RuleResult, Violation},
    sync::Sharing,
    tracker::{SubresourceState, TrackedState},
    DeviceSize, Id, NonExhaustive, Object, ObjectType,
};
use smallvec::SmallVec;
use std::sync::OnceLock;

vulkan_bitflags! {
    /// Describes how a buffer is going to be used. This is **not** just an optimization.
    BufferUsage = BufferUsageFlags(u32);

    /// The buffer can be used as a source for transfer, blit, resolve and clear commands.
    TRANSFER_SRC = TRANSFER_SRC,

    /// The buffer can be used as a destination for transfer, blit, resolve and clear commands.
    TRANSFER_DST = TRANSFER_DST,

    UNIFORM_TEXEL_BUFFER = UNIFORM_TEXEL_BUFFER,
    STORAGE_TEXEL_BUFFER = STORAGE_TEXEL_BUFFER,
    UNIFORM_BUFFER = UNIFORM_BUFFER,
    STORAGE_BUFFER = STORAGE_BUFFER,
    INDEX_BUFFER = INDEX_BUFFER,
    VERTEX_BUFFER = VERTEX_BUFFER,
    INDIRECT_BUFFER = INDIRECT_BUFFER,
}

/// Parameters to create a new [`Buffer`].
#[derive(Clone, Debug)]
pub struct BufferCreateInfo {
    /// The size in bytes of the buffer.
    ///
    /// The default value is `0`, which must be overridden.
    pub size: DeviceSize,

    /// How the buffer is going to be used.
    ///
    /// The default value is [`BufferUsage::empty()`], which must be overridden.
    pub usage: BufferUsage,

    /// The default value is [`Sharing::Exclusive`].
    pub sharing: Sharing<SmallVec<[u32; 4]>>,

    /// The external memory handle types that memory bound to the buffer may be imported from or
    /// exported to.
    ///
    /// The default value is empty.
    pub external_memory_handle_types: ExternalMemoryHandleTypes,

    pub _ne: NonExhaustive,
}

impl Default for BufferCreateInfo {
    #[inline]
    fn default() -> Self {
        BufferCreateInfo {
            size: 0,
            usage: BufferUsage::empty(),
            sharing: Sharing::Exclusive,
            external_memory_handle_types: ExternalMemoryHandleTypes::empty(),
            _ne: NonExhaustive(()),
        }
    }
}

/// The record of a buffer that was created on a device.
///
/// A buffer has a single subresource, whose ownership is tracked like that of an image
/// subresource.
#[derive(Debug)]
pub struct Buffer {
    id: Id<Buffer>,
    size: DeviceSize,
    usage: BufferUsage,
    sharing: Sharing<SmallVec<[u32; 4]>>,
    external_memory_handle_types: ExternalMemoryHandleTypes,
    memory: OnceLock<MemoryBinding>,
    state: TrackedState,
}

impl Buffer {
    pub(crate) fn new(id: Id<Buffer>, create_info: BufferCreateInfo) -> Self {
        let BufferCreateInfo {
            size,
            usage,
            sharing,
            external_memory_handle_types,
            _ne: _,
        } = create_info;

        Buffer {
            id,
            size,
            usage,
            sharing,
            external_memory_handle_types,
            memory: OnceLock::new(),
            state: TrackedState::new(1, SubresourceState::default()),
        }
    }

    #[inline]
    pub fn id(&self) -> Id<Buffer> {
        self.id
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    #[inline]
    pub fn sharing(&self) -> &Sharing<SmallVec<[u32; 4]>> {
        &self.sharing
    }

    #[inline]
    pub fn external_memory_handle_types(&self) -> ExternalMemoryHandleTypes {
        self.external_memory_handle_types
    }

    /// Returns the memory bound to the buffer, or `None` if no memory has been bound yet.
    #[inline]
    pub fn memory(&self) -> Option<&MemoryBinding> {
        self.memory.get()
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.memory.get().is_some()
    }

    pub(crate) fn set_memory(&self, binding: MemoryBinding) -> bool {
        self.memory.set(binding).is_ok()
    }

    pub(crate) fn state(&self) -> &TrackedState {
        &self.state
    }
}

impl Object for Buffer {
    const TYPE: ObjectType = ObjectType::Buffer;

    fn storage(resources: &crate::resource::Resources) -> &crate::resource::Storage<Self> {
        &resources.buffers
    }
}

fn create_info<'a>(ctx: &'a RuleContext<'_>) -> Option<&'a BufferCreateInfo> {
    match ctx.operation() {
        Operation::CreateBuffer(create_info) => Some(create_info),
        _ => None,
    }
}

pub(crate) fn size_nonzero(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.size == 0 {
        return Err(Violation::new("`size` is zero").into());
    }

    Ok(())
}

pub(crate) fn concurrent_family_count(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    crate::sync::check_concurrent_family_count(&create_info.sharing)
}

pub(crate) fn concurrent_family_index(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    crate::sync::check_concurrent_family_indices(ctx.environment(), &create_info.sharing)
}
