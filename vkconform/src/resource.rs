//! The registry of every object created through a device.
//!
//! Each kind of object is kept in its own [`Storage`], a map from [`Id`] to the shared record of
//! the object. IDs are handed out from a single monotonic counter and are never reused. When an
//! object is destroyed, its record is removed but its ID is kept as a tombstone, so that later
//! uses of the ID can be told apart from IDs that never existed.
//!
//! Every mutation of the registry is appended to a change feed, which can be read incrementally
//! with [`Resources::changes_since`].

use crate::{
    buffer::Buffer,
    command_buffer::CommandBuffer,
    image::{Image, ImageView},
    memory::{DeviceMemory, ExternalMemoryFd},
    render_pass::{Framebuffer, RenderPass},
    swapchain::Swapchain,
    DeviceSize, Error, Id, Object, ObjectType,
};
use foldhash::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    num::NonZero,
    sync::{
        atomic::{AtomicI32, AtomicU64, Ordering},
        Arc,
    },
};

/// The records of all live objects of one type.
pub struct Storage<T> {
    map: RwLock<HashMap<Id<T>, Arc<T>>>,
}

impl<T> Storage<T> {
    fn new() -> Self {
        Storage {
            map: RwLock::new(HashMap::default()),
        }
    }

    /// Returns the record of the object with the given ID, if it is alive.
    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<Arc<T>> {
        self.map.read().get(&id).cloned()
    }

    #[inline]
    pub fn contains(&self, id: Id<T>) -> bool {
        self.map.read().contains_key(&id)
    }

    /// Returns the number of live objects.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns the IDs of all live objects, in creation order.
    pub fn ids(&self) -> Vec<Id<T>> {
        let mut ids: Vec<_> = self.map.read().keys().copied().collect();
        ids.sort_unstable();

        ids
    }
}

impl<T> fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// The kind of change that a [`RegistryEvent`] records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistryChange {
    /// The object was created.
    Created,

    /// The object was destroyed, and its ID became a tombstone.
    Destroyed,

    /// Memory was bound to the image or buffer.
    Bound,

    /// The command buffer was submitted to a queue.
    Submitted,

    /// The command buffer finished executing.
    Retired,
}

/// An entry in the change feed of a [`Resources`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistryEvent {
    /// The position of the event in the feed, starting at 1.
    pub sequence: u64,

    /// The object that changed.
    pub id: Id,

    pub change: RegistryChange,
}

/// The allocation that a file descriptor was exported from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportedMemory {
    pub memory: Id<DeviceMemory>,
    pub allocation_size: DeviceSize,
    pub memory_type_index: u32,
}

/// The registry of the objects of a device.
pub struct Resources {
    next_serial: AtomicU64,
    tombstones: RwLock<HashSet<Id>>,
    events: Mutex<Vec<RegistryEvent>>,
    in_flight: Mutex<HashMap<Id, u32>>,
    external_formats: RwLock<HashSet<u64>>,
    exported_fds: Mutex<HashMap<ExternalMemoryFd, ExportedMemory>>,
    next_fd: AtomicI32,

    pub(crate) images: Storage<Image>,
    pub(crate) image_views: Storage<ImageView>,
    pub(crate) buffers: Storage<Buffer>,
    pub(crate) memories: Storage<DeviceMemory>,
    pub(crate) render_passes: Storage<RenderPass>,
    pub(crate) framebuffers: Storage<Framebuffer>,
    pub(crate) command_buffers: Storage<CommandBuffer>,
    pub(crate) swapchains: Storage<Swapchain>,
}

impl Resources {
    pub(crate) fn new() -> Self {
        Resources {
            next_serial: AtomicU64::new(1),
            tombstones: RwLock::new(HashSet::default()),
            events: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::default()),
            external_formats: RwLock::new(HashSet::default()),
            exported_fds: Mutex::new(HashMap::default()),
            // Low descriptors are taken by the standard streams.
            next_fd: AtomicI32::new(3),

            images: Storage::new(),
            image_views: Storage::new(),
            buffers: Storage::new(),
            memories: Storage::new(),
            render_passes: Storage::new(),
            framebuffers: Storage::new(),
            command_buffers: Storage::new(),
            swapchains: Storage::new(),
        }
    }

    /// Returns the storage of objects of type `O`.
    #[inline]
    pub fn storage<O: Object>(&self) -> &Storage<O> {
        O::storage(self)
    }

    /// Returns the record of the object with the given ID.
    ///
    /// # Errors
    ///
    /// Returns an error of kind [`NotFound`] if the object was destroyed or never existed.
    ///
    /// [`NotFound`]: crate::ErrorKind::NotFound
    #[inline]
    pub fn get<O: Object>(&self, id: Id<O>) -> Result<Arc<O>, Error> {
        O::storage(self).get(id).ok_or_else(|| Error::not_found(id))
    }

    #[inline]
    pub fn image(&self, id: Id<Image>) -> Result<Arc<Image>, Error> {
        self.get(id)
    }

    #[inline]
    pub fn image_view(&self, id: Id<ImageView>) -> Result<Arc<ImageView>, Error> {
        self.get(id)
    }

    #[inline]
    pub fn buffer(&self, id: Id<Buffer>) -> Result<Arc<Buffer>, Error> {
        self.get(id)
    }

    #[inline]
    pub fn memory(&self, id: Id<DeviceMemory>) -> Result<Arc<DeviceMemory>, Error> {
        self.get(id)
    }

    #[inline]
    pub fn render_pass(&self, id: Id<RenderPass>) -> Result<Arc<RenderPass>, Error> {
        self.get(id)
    }

    #[inline]
    pub fn framebuffer(&self, id: Id<Framebuffer>) -> Result<Arc<Framebuffer>, Error> {
        self.get(id)
    }

    #[inline]
    pub fn command_buffer(&self, id: Id<CommandBuffer>) -> Result<Arc<CommandBuffer>, Error> {
        self.get(id)
    }

    #[inline]
    pub fn swapchain(&self, id: Id<Swapchain>) -> Result<Arc<Swapchain>, Error> {
        self.get(id)
    }

    /// Returns whether the object with the given ID is alive.
    pub fn contains(&self, id: Id) -> bool {
        macro_rules! contains {
            ($($ty:ident => $storage:ident),+ $(,)?) => {
                match id.object_type() {
                    $(Some(ObjectType::$ty) => id
                        .downcast()
                        .is_some_and(|id| self.$storage.contains(id)),)+
                    None => false,
                }
            };
        }

        contains!(
            Image => images,
            ImageView => image_views,
            Buffer => buffers,
            DeviceMemory => memories,
            RenderPass => render_passes,
            Framebuffer => framebuffers,
            CommandBuffer => command_buffers,
            Swapchain => swapchains,
        )
    }

    /// Returns whether the object with the given ID existed, but has been destroyed.
    #[inline]
    pub fn is_destroyed(&self, id: Id) -> bool {
        self.tombstones.read().contains(&id)
    }

    /// Returns whether the ID was ever handed out by this registry.
    #[inline]
    pub fn is_known(&self, id: Id) -> bool {
        self.contains(id) || self.is_destroyed(id)
    }

    pub(crate) fn insert<O: Object>(&self, make: impl FnOnce(Id<O>) -> O) -> Arc<O> {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let id = Id::new(NonZero::new(serial).unwrap_or(NonZero::<u64>::MIN));
        let object = Arc::new(make(id));

        O::storage(self).map.write().insert(id, object.clone());
        self.record(id.erase(), RegistryChange::Created);

        object
    }

    pub(crate) fn remove<O: Object>(&self, id: Id<O>) -> Option<Arc<O>> {
        let object = O::storage(self).map.write().remove(&id)?;
        self.tombstones.write().insert(id.erase());
        self.record(id.erase(), RegistryChange::Destroyed);

        Some(object)
    }

    pub(crate) fn record(&self, id: Id, change: RegistryChange) {
        let mut events = self.events.lock();
        let sequence = events.len() as u64 + 1;
        events.push(RegistryEvent {
            sequence,
            id,
            change,
        });
    }

    /// Returns the events that were recorded after `cursor`, and the cursor to pass to the next
    /// call. A cursor of 0 returns every event.
    pub fn changes_since(&self, cursor: u64) -> (Vec<RegistryEvent>, u64) {
        let events = self.events.lock();
        let start = (cursor as usize).min(events.len());

        (events[start..].to_vec(), events.len() as u64)
    }

    /// Returns whether the object is referenced by a command buffer that is pending execution.
    #[inline]
    pub fn is_in_flight(&self, id: Id) -> bool {
        self.in_flight.lock().contains_key(&id)
    }

    pub(crate) fn pin(&self, ids: impl IntoIterator<Item = Id>) {
        let mut in_flight = self.in_flight.lock();

        for id in ids {
            *in_flight.entry(id).or_insert(0) += 1;
        }
    }

    pub(crate) fn unpin(&self, ids: impl IntoIterator<Item = Id>) {
        let mut in_flight = self.in_flight.lock();

        for id in ids {
            if let Some(count) = in_flight.get_mut(&id) {
                *count -= 1;

                if *count == 0 {
                    in_flight.remove(&id);
                }
            }
        }
    }

    pub(crate) fn add_external_format(&self, external_format: u64) {
        self.external_formats.write().insert(external_format);
    }

    /// Returns whether the external format was returned by a hardware buffer properties query.
    #[inline]
    pub fn is_external_format_known(&self, external_format: u64) -> bool {
        self.external_formats.read().contains(&external_format)
    }

    pub(crate) fn export_fd(&self, memory: &DeviceMemory) -> ExternalMemoryFd {
        let fd = ExternalMemoryFd {
            fd: self.next_fd.fetch_add(1, Ordering::Relaxed),
        };
        self.exported_fds.lock().insert(
            fd,
            ExportedMemory {
                memory: memory.id(),
                allocation_size: memory.allocation_size(),
                memory_type_index: memory.memory_type_index(),
            },
        );

        fd
    }

    /// Returns the allocation that the file descriptor was exported from, if it has not been
    /// imported yet.
    #[inline]
    pub fn exported_fd(&self, fd: ExternalMemoryFd) -> Option<ExportedMemory> {
        self.exported_fds.lock().get(&fd).copied()
    }

    pub(crate) fn take_exported_fd(&self, fd: ExternalMemoryFd) -> Option<ExportedMemory> {
        self.exported_fds.lock().remove(&fd)
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("images", &self.images)
            .field("image_views", &self.image_views)
            .field("buffers", &self.buffers)
            .field("memories", &self.memories)
            .field("render_passes", &self.render_passes)
            .field("framebuffers", &self.framebuffers)
            .field("command_buffers", &self.command_buffers)
            .field("swapchains", &self.swapchains)
            .finish_non_exhaustive()
    }
}
