//! Images, image views and the rules that apply when they are created.
//!
//! An image is a multidimensional array of texels, divided into subresources: one for each
//! combination of aspect, mip level and array layer. The state of each subresource (its layout
//! and which queue family owns it) is tracked separately by the [tracker].
//!
//! [tracker]: crate::tracker

use crate::{
    format::Format,
    macros::{vulkan_bitflags, vulkan_enum},
    memory::{ExternalMemoryHandleTypes, MemoryBinding},
    rules::{Operation, RuleContext, RuleResult, Violation},
    swapchain::Swapchain,
    sync::Sharing,
    tracker::{SubresourceState, TrackedState},
    DeviceSize, Id, NonExhaustive, Object, ObjectType,
};
use smallvec::SmallVec;
use std::{num::NonZero, ops::Range, sync::OnceLock};

vulkan_bitflags! {
    /// Describes how an image is going to be used. This is **not** just an optimization.
    ImageUsage = ImageUsageFlags(u32);

    /// The image can be used as a source for transfer, blit, resolve and clear commands.
    TRANSFER_SRC = TRANSFER_SRC,

    /// The image can be used as a destination for transfer, blit, resolve and clear commands.
    TRANSFER_DST = TRANSFER_DST,

    /// The image can be used as a sampled image in a shader.
    SAMPLED = SAMPLED,

    /// The image can be used as a storage image in a shader.
    STORAGE = STORAGE,

    /// The image can be used as a color or resolve attachment in a render pass.
    COLOR_ATTACHMENT = COLOR_ATTACHMENT,

    /// The image can be used as a depth/stencil attachment in a render pass.
    DEPTH_STENCIL_ATTACHMENT = DEPTH_STENCIL_ATTACHMENT,

    /// The image will be used as an attachment, and will only ever be used temporarily.
    TRANSIENT_ATTACHMENT = TRANSIENT_ATTACHMENT,

    /// The image can be used as an input attachment in a render pass.
    INPUT_ATTACHMENT = INPUT_ATTACHMENT,
}

vulkan_bitflags! {
    /// Flags specifying additional properties of an image.
    ImageCreateFlags = ImageCreateFlags(u32);

    SPARSE_BINDING = SPARSE_BINDING,

    /// Views of the image can have a format other than the format of the image itself.
    MUTABLE_FORMAT = MUTABLE_FORMAT,

    /// Views of the image can have the cube or cube array type.
    CUBE_COMPATIBLE = CUBE_COMPATIBLE,

    /// For 3D images, views of the image can have the 2D or 2D array type, where each depth
    /// slice is treated as an array layer.
    ARRAY_2D_COMPATIBLE = TYPE_2D_ARRAY_COMPATIBLE,

    EXTENDED_USAGE = EXTENDED_USAGE,

    PROTECTED = PROTECTED,
}

vulkan_bitflags! {
    /// A mask specifying one or more aspects of an image.
    ImageAspects impl {
        /// Returns an iterator over the single aspects that are set in `self`, in the order in
        /// which their subresources are laid out.
        pub fn iter(self) -> impl Iterator<Item = ImageAspect> {
            [ImageAspect::Color, ImageAspect::Depth, ImageAspect::Stencil]
                .into_iter()
                .filter(move |&aspect| self.intersects(aspect.into()))
        }
    }
    = ImageAspectFlags(u32);

    COLOR = COLOR,
    DEPTH = DEPTH,
    STENCIL = STENCIL,
}

vulkan_enum! {
    /// A single aspect of an image.
    ImageAspect = ImageAspectFlags(u32);

    Color = COLOR,
    Depth = DEPTH,
    Stencil = STENCIL,
}

impl From<ImageAspect> for ImageAspects {
    #[inline]
    fn from(aspect: ImageAspect) -> Self {
        ImageAspects(aspect as u32)
    }
}

vulkan_enum! {
    /// In-memory layout of the texels of an image subresource.
    ///
    /// Each layout is optimal for a particular kind of access. The GPU is only guaranteed to
    /// interpret the memory of a subresource correctly if the layout that an operation declares
    /// matches the layout that the subresource is actually in. The tracker keeps the latter for
    /// every subresource, and diagnoses operations that declare a different one.
    ImageLayout = ImageLayout(i32);

    /// The layout of the data is unknown, and the image is treated as containing no valid data.
    /// As the old layout of a transition, this is a wildcard that matches any current layout.
    Undefined = UNDEFINED,

    /// A layout that supports all kinds of access, but is not optimal for any of them.
    General = GENERAL,

    /// A layout optimized for use as a color attachment in a render pass.
    ColorAttachmentOptimal = COLOR_ATTACHMENT_OPTIMAL,

    /// A layout optimized for use as a depth/stencil attachment in a render pass.
    DepthStencilAttachmentOptimal = DEPTH_STENCIL_ATTACHMENT_OPTIMAL,

    /// A layout optimized for read-only use as a depth/stencil attachment.
    DepthStencilReadOnlyOptimal = DEPTH_STENCIL_READ_ONLY_OPTIMAL,

    /// A layout optimized for read-only use in shaders.
    ShaderReadOnlyOptimal = SHADER_READ_ONLY_OPTIMAL,

    /// A layout optimized for use as the source of transfer operations.
    TransferSrcOptimal = TRANSFER_SRC_OPTIMAL,

    /// A layout optimized for use as the destination of transfer operations.
    TransferDstOptimal = TRANSFER_DST_OPTIMAL,

    /// The data of a linear image was written by the host before any device access.
    Preinitialized = PREINITIALIZED,

    /// The layout that swapchain images must be in when they are presented.
    PresentSrc = PRESENT_SRC_KHR,
}

impl Default for ImageLayout {
    #[inline]
    fn default() -> Self {
        ImageLayout::Undefined
    }
}

vulkan_enum! {
    /// The basic dimensionality of an image.
    ImageType = ImageType(i32);

    Dim1d = TYPE_1D,
    Dim2d = TYPE_2D,
    Dim3d = TYPE_3D,
}

vulkan_enum! {
    /// The arrangement of texels in the memory of an image.
    ImageTiling = ImageTiling(i32);

    Optimal = OPTIMAL,
    Linear = LINEAR,
}

vulkan_enum! {
    /// The number of samples per texel of an image.
    SampleCount = SampleCountFlags(u32);

    Sample1 = TYPE_1,
    Sample2 = TYPE_2,
    Sample4 = TYPE_4,
    Sample8 = TYPE_8,
    Sample16 = TYPE_16,
    Sample32 = TYPE_32,
    Sample64 = TYPE_64,
}

vulkan_enum! {
    /// The type of an image view.
    ImageViewType = ImageViewType(i32);

    Dim1d = TYPE_1D,
    Dim2d = TYPE_2D,
    Dim3d = TYPE_3D,
    Cube = CUBE,
    Dim1dArray = TYPE_1D_ARRAY,
    Dim2dArray = TYPE_2D_ARRAY,
    CubeArray = CUBE_ARRAY,
}

vulkan_enum! {
    /// Describes the value that an individual component of an image view takes.
    ComponentSwizzle = ComponentSwizzle(i32);

    /// Returns the component that corresponds to this component in the image.
    Identity = IDENTITY,
    Zero = ZERO,
    One = ONE,
    Red = R,
    Green = G,
    Blue = B,
    Alpha = A,
}

impl Default for ComponentSwizzle {
    #[inline]
    fn default() -> Self {
        ComponentSwizzle::Identity
    }
}

/// Specifies how the components of an image view are mapped from the components of the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ComponentMapping {
    pub r: ComponentSwizzle,
    pub g: ComponentSwizzle,
    pub b: ComponentSwizzle,
    pub a: ComponentSwizzle,
}

impl ComponentMapping {
    /// Returns whether every component is mapped to the same component of the image.
    pub fn is_identity(&self) -> bool {
        matches!(self.r, ComponentSwizzle::Identity | ComponentSwizzle::Red)
            && matches!(self.g, ComponentSwizzle::Identity | ComponentSwizzle::Green)
            && matches!(self.b, ComponentSwizzle::Identity | ComponentSwizzle::Blue)
            && matches!(self.a, ComponentSwizzle::Identity | ComponentSwizzle::Alpha)
    }
}

/// One or more subresources of an image, spanning a single or multiple aspects, mip levels and
/// array layers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    pub aspects: ImageAspects,
    pub mip_levels: Range<u32>,
    pub array_layers: Range<u32>,
}

/// A single subresource of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresource {
    pub aspect: ImageAspect,
    pub mip_level: u32,
    pub array_layer: u32,
}

/// Parameters to create a new [`Image`].
#[derive(Clone, Debug)]
pub struct ImageCreateInfo {
    pub flags: ImageCreateFlags,

    /// The default value is [`ImageType::Dim2d`].
    pub image_type: ImageType,

    /// The format of the texels. Must be [`Format::UNDEFINED`] if and only if `external_format`
    /// is `Some`.
    ///
    /// The default value is [`Format::UNDEFINED`].
    pub format: Format,

    /// An implementation-defined format of an imported Android hardware buffer, as returned by
    /// [`Device::hardware_buffer_properties`].
    ///
    /// The default value is `None`.
    ///
    /// [`Device::hardware_buffer_properties`]: crate::device::Device::hardware_buffer_properties
    pub external_format: Option<NonZero<u64>>,

    /// The formats that views of the image may have, if the image has the
    /// [`ImageCreateFlags::MUTABLE_FORMAT`] flag.
    ///
    /// The default value is empty.
    pub view_formats: Vec<Format>,

    /// The default value is `[0; 3]`, which must be overridden.
    pub extent: [u32; 3],

    /// The default value is `1`.
    pub mip_levels: u32,

    /// The default value is `1`.
    pub array_layers: u32,

    /// The default value is [`SampleCount::Sample1`].
    pub samples: SampleCount,

    /// The default value is [`ImageTiling::Optimal`].
    pub tiling: ImageTiling,

    /// The default value is [`ImageUsage::empty()`], which must be overridden.
    pub usage: ImageUsage,

    /// The default value is [`Sharing::Exclusive`].
    pub sharing: Sharing<SmallVec<[u32; 4]>>,

    /// The layout that the subresources are in when the image is created. Must be either
    /// [`ImageLayout::Undefined`] or [`ImageLayout::Preinitialized`].
    ///
    /// The default value is [`ImageLayout::Undefined`].
    pub initial_layout: ImageLayout,

    /// The external memory handle types that memory bound to the image may be imported from or
    /// exported to.
    ///
    /// The default value is empty.
    pub external_memory_handle_types: ExternalMemoryHandleTypes,

    pub _ne: NonExhaustive,
}

impl Default for ImageCreateInfo {
    #[inline]
    fn default() -> Self {
        ImageCreateInfo {
            flags: ImageCreateFlags::empty(),
            image_type: ImageType::Dim2d,
            format: Format::UNDEFINED,
            external_format: None,
            view_formats: Vec::new(),
            extent: [0; 3],
            mip_levels: 1,
            array_layers: 1,
            samples: SampleCount::Sample1,
            tiling: ImageTiling::Optimal,
            usage: ImageUsage::empty(),
            sharing: Sharing::Exclusive,
            initial_layout: ImageLayout::Undefined,
            external_memory_handle_types: ExternalMemoryHandleTypes::empty(),
            _ne: NonExhaustive(()),
        }
    }
}

/// Returns the maximum number of mip levels for an image of the given extent.
pub fn max_mip_levels(extent: [u32; 3]) -> u32 {
    32 - (extent[0] | extent[1] | extent[2]).leading_zeros()
}

/// Returns the extent of the given mip level of an image of the given extent.
pub fn mip_level_extent(extent: [u32; 3], level: u32) -> [u32; 3] {
    extent.map(|e| (e >> level.min(31)).max(1))
}

/// The memory that backs an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageMemory {
    /// The image is backed by memory that was bound to it.
    Normal(MemoryBinding),

    /// The image is one of the images of a swapchain, and its memory is owned by the swapchain.
    Swapchain {
        swapchain: Id<Swapchain>,
        image_index: u32,
    },
}

/// The record of an image that was created on a device.
#[derive(Debug)]
pub struct Image {
    id: Id<Image>,
    flags: ImageCreateFlags,
    image_type: ImageType,
    format: Format,
    external_format: Option<NonZero<u64>>,
    view_formats: Vec<Format>,
    extent: [u32; 3],
    mip_levels: u32,
    array_layers: u32,
    samples: SampleCount,
    tiling: ImageTiling,
    usage: ImageUsage,
    sharing: Sharing<SmallVec<[u32; 4]>>,
    external_memory_handle_types: ExternalMemoryHandleTypes,

    aspect_list: SmallVec<[ImageAspect; 3]>,
    memory: OnceLock<ImageMemory>,
    state: TrackedState,
}

impl Image {
    pub(crate) fn new(id: Id<Image>, create_info: ImageCreateInfo) -> Self {
        let ImageCreateInfo {
            flags,
            image_type,
            format,
            external_format,
            view_formats,
            extent,
            mip_levels,
            array_layers,
            samples,
            tiling,
            usage,
            sharing,
            initial_layout,
            external_memory_handle_types,
            _ne: _,
        } = create_info;

        // External formats have no aspects that Vulkan knows of, but they are color formats.
        let aspect_list: SmallVec<[ImageAspect; 3]> = if format == Format::UNDEFINED {
            SmallVec::from_slice(&[ImageAspect::Color])
        } else {
            format.aspects().iter().collect()
        };
        let range_size = aspect_list.len() as DeviceSize
            * mip_levels as DeviceSize
            * Self::tracked_layers(image_type, array_layers) as DeviceSize;

        Image {
            id,
            flags,
            image_type,
            format,
            external_format,
            view_formats,
            extent,
            mip_levels,
            array_layers,
            samples,
            tiling,
            usage,
            sharing,
            external_memory_handle_types,

            aspect_list,
            memory: OnceLock::new(),
            state: TrackedState::new(range_size, SubresourceState::new(initial_layout)),
        }
    }

    pub(crate) fn new_swapchain_image(
        id: Id<Image>,
        create_info: ImageCreateInfo,
        swapchain: Id<Swapchain>,
        image_index: u32,
    ) -> Self {
        let image = Image::new(id, create_info);
        let _ = image.memory.set(ImageMemory::Swapchain {
            swapchain,
            image_index,
        });

        image
    }

    // The depth slices of 3D images are not tracked as separate subresources.
    fn tracked_layers(image_type: ImageType, array_layers: u32) -> u32 {
        if image_type == ImageType::Dim3d {
            1
        } else {
            array_layers
        }
    }

    /// Returns the ID of the image.
    #[inline]
    pub fn id(&self) -> Id<Image> {
        self.id
    }

    #[inline]
    pub fn flags(&self) -> ImageCreateFlags {
        self.flags
    }

    #[inline]
    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    pub fn external_format(&self) -> Option<NonZero<u64>> {
        self.external_format
    }

    #[inline]
    pub fn view_formats(&self) -> &[Format] {
        &self.view_formats
    }

    #[inline]
    pub fn extent(&self) -> [u32; 3] {
        self.extent
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    #[inline]
    pub fn samples(&self) -> SampleCount {
        self.samples
    }

    #[inline]
    pub fn tiling(&self) -> ImageTiling {
        self.tiling
    }

    #[inline]
    pub fn usage(&self) -> ImageUsage {
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

    /// Returns the memory that backs the image, or `None` if no memory has been bound yet.
    #[inline]
    pub fn memory(&self) -> Option<&ImageMemory> {
        self.memory.get()
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.memory.get().is_some()
    }

    pub(crate) fn set_memory(&self, memory: ImageMemory) -> bool {
        self.memory.set(memory).is_ok()
    }

    /// Returns whether this is a swapchain image.
    #[inline]
    pub fn is_swapchain_image(&self) -> bool {
        matches!(self.memory.get(), Some(ImageMemory::Swapchain { .. }))
    }

    /// Returns whether the memory requirements of the image are only known once memory has been
    /// bound to it. This is the case for images backed by Android hardware buffers.
    #[inline]
    pub fn has_deferred_requirements(&self) -> bool {
        self.external_memory_handle_types
            .intersects(ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER)
    }

    /// Returns a subresource range covering the whole image.
    pub fn subresource_range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange {
            aspects: self.aspects(),
            mip_levels: 0..self.mip_levels,
            array_layers: 0..self.array_layers,
        }
    }

    /// Returns the aspects of the image.
    pub fn aspects(&self) -> ImageAspects {
        self.aspect_list
            .iter()
            .fold(ImageAspects::empty(), |acc, &aspect| acc | aspect.into())
    }

    pub(crate) fn state(&self) -> &TrackedState {
        &self.state
    }

    /// Returns the flattened subresource ranges covered by `subresource_range`.
    ///
    /// In ranges, the subresources are "flattened" to `DeviceSize`, where each index in the range
    /// is a single array layer. The layers are arranged hierarchically: aspects at the top level,
    /// with the mip levels in that aspect, and the array layers in that mip level. Parts of the
    /// range that lie outside the image are ignored.
    ///
    /// For 3D images, the array layers of the range are ignored and every range covers a whole
    /// mip level, as depth slices are not tracked separately.
    pub fn iter_ranges(
        &self,
        subresource_range: &ImageSubresourceRange,
    ) -> SmallVec<[Range<DeviceSize>; 4]> {
        let tracked_layers = Self::tracked_layers(self.image_type, self.array_layers);
        let mip_level_size = tracked_layers as DeviceSize;
        let aspect_size = self.mip_levels as DeviceSize * mip_level_size;

        let array_layers = if self.image_type == ImageType::Dim3d {
            0..1
        } else {
            subresource_range.array_layers.start.min(tracked_layers)
                ..subresource_range.array_layers.end.min(tracked_layers)
        };
        let mip_levels = subresource_range.mip_levels.start.min(self.mip_levels)
            ..subresource_range.mip_levels.end.min(self.mip_levels);

        let mut ranges = SmallVec::new();

        if array_layers.is_empty() || mip_levels.is_empty() {
            return ranges;
        }

        for (aspect_num, aspect) in self.aspect_list.iter().enumerate() {
            if !subresource_range.aspects.intersects((*aspect).into()) {
                continue;
            }

            for mip_level in mip_levels.clone() {
                let offset =
                    aspect_num as DeviceSize * aspect_size + mip_level as DeviceSize * mip_level_size;
                let range =
                    offset + array_layers.start as DeviceSize..offset + array_layers.end as DeviceSize;

                // Coalesce with the previous range when all layers are covered.
                match ranges.last_mut() {
                    Some(last) if last.end == range.start => last.end = range.end,
                    _ => ranges.push(range),
                }
            }
        }

        ranges
    }
}

impl Object for Image {
    const TYPE: ObjectType = ObjectType::Image;

    fn storage(resources: &crate::resource::Resources) -> &crate::resource::Storage<Self> {
        &resources.images
    }
}

/// Parameters to create a new [`ImageView`].
#[derive(Clone, Debug)]
pub struct ImageViewCreateInfo {
    /// The image that the view is created from.
    ///
    /// There is no default value.
    pub image: Id<Image>,

    /// The default value is [`ImageViewType::Dim2d`].
    pub view_type: ImageViewType,

    /// The format of the view. If this is [`Format::UNDEFINED`], the format of the image is used.
    ///
    /// The default value is [`Format::UNDEFINED`].
    pub format: Format,

    pub component_mapping: ComponentMapping,

    /// The subresources of the image that the view covers.
    ///
    /// The default value covers the first mip level and array layer of the color aspect.
    pub subresource_range: ImageSubresourceRange,

    /// How the view is going to be used. If this is empty, the usage of the image is used.
    ///
    /// The default value is [`ImageUsage::empty()`].
    pub usage: ImageUsage,

    pub _ne: NonExhaustive,
}

impl ImageViewCreateInfo {
    /// Returns an `ImageViewCreateInfo` for a view of `image`, with the other fields set to their
    /// defaults.
    #[inline]
    pub fn image(image: Id<Image>) -> Self {
        ImageViewCreateInfo {
            image,
            view_type: ImageViewType::Dim2d,
            format: Format::UNDEFINED,
            component_mapping: ComponentMapping::default(),
            subresource_range: ImageSubresourceRange {
                aspects: ImageAspects::COLOR,
                mip_levels: 0..1,
                array_layers: 0..1,
            },
            usage: ImageUsage::empty(),
            _ne: NonExhaustive(()),
        }
    }
}

/// The record of an image view that was created on a device.
#[derive(Debug)]
pub struct ImageView {
    id: Id<ImageView>,
    image: std::sync::Arc<Image>,
    view_type: ImageViewType,
    format: Format,
    component_mapping: ComponentMapping,
    subresource_range: ImageSubresourceRange,
    usage: ImageUsage,
}

impl ImageView {
    pub(crate) fn new(
        id: Id<ImageView>,
        image: std::sync::Arc<Image>,
        create_info: ImageViewCreateInfo,
    ) -> Self {
        let ImageViewCreateInfo {
            image: _,
            view_type,
            format,
            component_mapping,
            subresource_range,
            usage,
            _ne: _,
        } = create_info;

        let format = if format == Format::UNDEFINED {
            image.format()
        } else {
            format
        };
        let usage = if usage.is_empty() {
            image.usage()
        } else {
            usage
        };

        ImageView {
            id,
            image,
            view_type,
            format,
            component_mapping,
            subresource_range,
            usage,
        }
    }

    #[inline]
    pub fn id(&self) -> Id<ImageView> {
        self.id
    }

    /// Returns the image that the view was created from.
    #[inline]
    pub fn image(&self) -> &std::sync::Arc<Image> {
        &self.image
    }

    #[inline]
    pub fn view_type(&self) -> ImageViewType {
        self.view_type
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    pub fn component_mapping(&self) -> ComponentMapping {
        self.component_mapping
    }

    #[inline]
    pub fn subresource_range(&self) -> &ImageSubresourceRange {
        &self.subresource_range
    }

    /// Returns the usage of the view, which is either the usage it was created with, or the
    /// usage of the image.
    #[inline]
    pub fn usage(&self) -> ImageUsage {
        self.usage
    }

    /// Returns the extent of the view, which is the extent of its first mip level.
    pub fn extent(&self) -> [u32; 3] {
        mip_level_extent(self.image.extent(), self.subresource_range.mip_levels.start)
    }

    /// Returns the number of layers of the view.
    #[inline]
    pub fn layer_count(&self) -> u32 {
        self.subresource_range.array_layers.len() as u32
    }
}

impl Object for ImageView {
    const TYPE: ObjectType = ObjectType::ImageView;

    fn storage(resources: &crate::resource::Resources) -> &crate::resource::Storage<Self> {
        &resources.image_views
    }
}

fn create_info<'a>(ctx: &'a RuleContext<'_>) -> Option<&'a ImageCreateInfo> {
    match ctx.operation() {
        Operation::CreateImage(create_info) => Some(create_info),
        _ => None,
    }
}

pub(crate) fn format_or_external_format(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.format == Format::UNDEFINED && create_info.external_format.is_none() {
        return Err(Violation::new(
            "`format` is `Format::UNDEFINED`, but no nonzero `external_format` is provided",
        )
        .into());
    }

    Ok(())
}

pub(crate) fn external_format_with_format(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.external_format.is_some() && create_info.format != Format::UNDEFINED {
        return Err(Violation::new(format!(
            "`external_format` is provided, but `format` is `{:?}` instead of \
            `Format::UNDEFINED`",
            create_info.format,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn external_format_known(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if let Some(external_format) = create_info.external_format {
        if !ctx.resources().is_external_format_known(external_format.get()) {
            return Err(Violation::new(format!(
                "`external_format` {external_format} was not returned by a hardware buffer \
                properties query",
            ))
            .into());
        }
    }

    Ok(())
}

pub(crate) fn external_format_mutable(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.external_format.is_some()
        && create_info.flags.intersects(ImageCreateFlags::MUTABLE_FORMAT)
    {
        return Err(Violation::new(
            "`external_format` is provided, but `flags` contains `ImageCreateFlags::MUTABLE_FORMAT`",
        )
        .into());
    }

    Ok(())
}

pub(crate) fn external_format_usage(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.external_format.is_some() && create_info.usage != ImageUsage::SAMPLED {
        return Err(Violation::new(format!(
            "`external_format` is provided, but `usage` is `{:?}` instead of only \
            `ImageUsage::SAMPLED`",
            create_info.usage,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn external_format_tiling(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.external_format.is_some() && create_info.tiling != ImageTiling::Optimal {
        return Err(Violation::new(
            "`external_format` is provided, but `tiling` is not `ImageTiling::Optimal`",
        )
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_image_type(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info
        .external_memory_handle_types
        .intersects(ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER)
        && create_info.image_type != ImageType::Dim2d
    {
        return Err(Violation::new(
            "`external_memory_handle_types` contains \
            `ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER`, but `image_type` is not \
            `ImageType::Dim2d`",
        )
        .into());
    }

    Ok(())
}

pub(crate) fn hardware_buffer_mip_levels(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info
        .external_memory_handle_types
        .intersects(ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER)
        && create_info.mip_levels != 1
        && create_info.mip_levels != max_mip_levels(create_info.extent)
    {
        return Err(Violation::new(format!(
            "`external_memory_handle_types` contains \
            `ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER`, but `mip_levels` is {} \
            instead of either 1 or the full mip chain",
            create_info.mip_levels,
        ))
        .into());
    }

    Ok(())
}

fn extent_nonzero(ctx: &RuleContext<'_>, dimension: usize) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.extent[dimension] == 0 {
        return Err(Violation::new(format!("`extent[{dimension}]` is zero")).into());
    }

    Ok(())
}

pub(crate) fn extent_width(ctx: &RuleContext<'_>) -> RuleResult {
    extent_nonzero(ctx, 0)
}

pub(crate) fn extent_height(ctx: &RuleContext<'_>) -> RuleResult {
    extent_nonzero(ctx, 1)
}

pub(crate) fn extent_depth(ctx: &RuleContext<'_>) -> RuleResult {
    extent_nonzero(ctx, 2)
}

pub(crate) fn extent_1d(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.image_type == ImageType::Dim1d && create_info.extent[1..] != [1, 1] {
        return Err(Violation::new(
            "`image_type` is `ImageType::Dim1d`, but `extent[1]` and `extent[2]` are not both 1",
        )
        .into());
    }

    Ok(())
}

pub(crate) fn extent_2d(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.image_type == ImageType::Dim2d && create_info.extent[2] != 1 {
        return Err(Violation::new(
            "`image_type` is `ImageType::Dim2d`, but `extent[2]` is not 1",
        )
        .into());
    }

    Ok(())
}

/// Checks that the dimension `index` of the extent is within the largest extent of images of the
/// type. Dimensions that the image type fixes to 1 are left to `extent_1d` and `extent_2d`.
fn extent_max(ctx: &RuleContext<'_>, index: usize) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };
    let dimensions = match create_info.image_type {
        ImageType::Dim1d => 1,
        ImageType::Dim2d => 2,
        ImageType::Dim3d => 3,
    };

    if index >= dimensions {
        return Ok(());
    }

    let max = ctx.environment().max_image_dimension(create_info.image_type);

    if create_info.extent[index] > max {
        return Err(Violation::new(format!(
            "`extent[{index}]` is {}, but images of type {:?} can be at most {max} texels in \
            every dimension",
            create_info.extent[index], create_info.image_type,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn extent_max_width(ctx: &RuleContext<'_>) -> RuleResult {
    extent_max(ctx, 0)
}

pub(crate) fn extent_max_height(ctx: &RuleContext<'_>) -> RuleResult {
    extent_max(ctx, 1)
}

pub(crate) fn extent_max_depth(ctx: &RuleContext<'_>) -> RuleResult {
    extent_max(ctx, 2)
}

pub(crate) fn mip_levels_nonzero(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.mip_levels == 0 {
        return Err(Violation::new("`mip_levels` is zero").into());
    }

    Ok(())
}

pub(crate) fn mip_levels_max(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    let max = max_mip_levels(create_info.extent);

    if create_info.mip_levels > max {
        return Err(Violation::new(format!(
            "`mip_levels` is {}, but the extent only allows {max} mip levels",
            create_info.mip_levels,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn array_layers_nonzero(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.array_layers == 0 {
        return Err(Violation::new("`array_layers` is zero").into());
    }

    Ok(())
}

pub(crate) fn cube_compatible(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };

    if create_info.flags.intersects(ImageCreateFlags::CUBE_COMPATIBLE)
        && (create_info.image_type != ImageType::Dim2d
            || create_info.extent[0] != create_info.extent[1]
            || create_info.array_layers < 6)
    {
        return Err(Violation::new(
            "`flags` contains `ImageCreateFlags::CUBE_COMPATIBLE`, but the image is not a \
            square 2D image with at least 6 array layers",
        )
        .into());
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

fn view_create_info<'a>(
    ctx: &'a RuleContext<'_>,
) -> Option<(&'a ImageViewCreateInfo, std::sync::Arc<Image>)> {
    match ctx.operation() {
        Operation::CreateImageView(create_info) => {
            let image = ctx.resources().get(create_info.image).ok()?;

            Some((create_info, image))
        }
        _ => None,
    }
}

/// Returns the number of layers that a view can address at `mip_level`: the depth slices for 2D
/// views of 3D images, otherwise the array layers.
fn view_layer_limit(image: &Image, view_type: ImageViewType, mip_level: u32) -> u32 {
    if image.image_type() == ImageType::Dim3d
        && matches!(view_type, ImageViewType::Dim2d | ImageViewType::Dim2dArray)
    {
        mip_level_extent(image.extent(), mip_level)[2]
    } else {
        image.array_layers()
    }
}

pub(crate) fn view_base_mip_level(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };

    if create_info.subresource_range.mip_levels.start >= image.mip_levels() {
        return Err(Violation::new(format!(
            "`subresource_range.mip_levels.start` is {}, but the image has only {} mip levels",
            create_info.subresource_range.mip_levels.start,
            image.mip_levels(),
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn view_mip_level_count(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };

    let mip_levels = &create_info.subresource_range.mip_levels;

    if mip_levels.is_empty() || mip_levels.end > image.mip_levels() {
        return Err(Violation::new(format!(
            "`subresource_range.mip_levels` is {mip_levels:?}, which is empty or exceeds the {} \
            mip levels of the image",
            image.mip_levels(),
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn view_base_array_layer(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };

    let range = &create_info.subresource_range;
    let limit = view_layer_limit(&image, create_info.view_type, range.mip_levels.start);

    if range.array_layers.start >= limit {
        return Err(Violation::new(format!(
            "`subresource_range.array_layers.start` is {}, but the image has only {limit} \
            layers",
            range.array_layers.start,
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn view_array_layer_count(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };

    let range = &create_info.subresource_range;
    let limit = view_layer_limit(&image, create_info.view_type, range.mip_levels.start);

    if range.array_layers.is_empty() || range.array_layers.end > limit {
        return Err(Violation::new(format!(
            "`subresource_range.array_layers` is {:?}, which is empty or exceeds the {limit} \
            layers of the image",
            range.array_layers,
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn view_2d_of_3d_compatible(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };

    if image.image_type() == ImageType::Dim3d
        && matches!(
            create_info.view_type,
            ImageViewType::Dim2d | ImageViewType::Dim2dArray
        )
        && !image.flags().intersects(ImageCreateFlags::ARRAY_2D_COMPATIBLE)
    {
        return Err(Violation::new(
            "the image is a 3D image and `view_type` is 2D or 2D array, but the image was not \
            created with `ImageCreateFlags::ARRAY_2D_COMPATIBLE`",
        )
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn portability_multisample_array(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = create_info(ctx) else {
        return Ok(());
    };
    let Some(features) = ctx.environment().portability_subset() else {
        return Ok(());
    };

    if !features.multisample_array_image
        && create_info.samples != SampleCount::Sample1
        && create_info.array_layers > 1
    {
        return Err(Violation::new(
            "the portability subset doesn't support multisampled images with more than one \
            array layer",
        )
        .into());
    }

    Ok(())
}

pub(crate) fn portability_view_2d_on_3d(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };
    let Some(features) = ctx.environment().portability_subset() else {
        return Ok(());
    };

    if !features.image_view_2d_on_3d_image
        && image.image_type() == ImageType::Dim3d
        && matches!(
            create_info.view_type,
            ImageViewType::Dim2d | ImageViewType::Dim2dArray
        )
    {
        return Err(Violation::new(
            "the portability subset doesn't support 2D or 2D array views of 3D images",
        )
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn portability_view_swizzle(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };
    let Some(features) = ctx.environment().portability_subset() else {
        return Ok(());
    };

    if !features.image_view_format_swizzle && !create_info.component_mapping.is_identity() {
        return Err(Violation::new(
            "the portability subset doesn't support component mappings other than the identity",
        )
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn portability_view_reinterpretation(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };
    let Some(features) = ctx.environment().portability_subset() else {
        return Ok(());
    };

    if !features.image_view_format_reinterpretation
        && create_info.format != Format::UNDEFINED
        && create_info.format.component_bits() != image.format().component_bits()
    {
        return Err(Violation::new(format!(
            "`format` is `{:?}`, which has different components than the format `{:?}` of the \
            image, but the portability subset doesn't support format reinterpretation",
            create_info.format,
            image.format(),
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn view_2d_of_3d_level_count(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };

    if image.image_type() == ImageType::Dim3d
        && matches!(
            create_info.view_type,
            ImageViewType::Dim2d | ImageViewType::Dim2dArray
        )
        && create_info.subresource_range.mip_levels.len() != 1
    {
        return Err(Violation::new(
            "the image is a 3D image and `view_type` is 2D or 2D array, but \
            `subresource_range.mip_levels` does not contain exactly one mip level",
        )
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn view_format(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };

    if create_info.format != Format::UNDEFINED
        && create_info.format != image.format()
        && !image.flags().intersects(ImageCreateFlags::MUTABLE_FORMAT)
    {
        return Err(Violation::new(format!(
            "`format` is `{:?}`, which differs from the format `{:?}` of the image, but the \
            image was not created with `ImageCreateFlags::MUTABLE_FORMAT`",
            create_info.format,
            image.format(),
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn view_usage(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };

    if !image.usage().contains(create_info.usage) {
        return Err(Violation::new(format!(
            "`usage` is `{:?}`, which is not a subset of the usage `{:?}` of the image",
            create_info.usage,
            image.usage(),
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn view_external_format(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };

    if image.external_format().is_some() && create_info.format != Format::UNDEFINED {
        return Err(Violation::new(format!(
            "the image has an external format, but `format` is `{:?}` instead of \
            `Format::UNDEFINED`",
            create_info.format,
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn view_external_format_swizzle(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, image)) = view_create_info(ctx) else {
        return Ok(());
    };

    if image.external_format().is_some() && !create_info.component_mapping.is_identity() {
        return Err(Violation::new(
            "the image has an external format, but `component_mapping` is not the identity \
            mapping",
        )
        .object(image.id())
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{format::Format, tests::color_image_info};

    #[test]
    fn mip_levels() {
        assert_eq!(max_mip_levels([1, 1, 1]), 1);
        assert_eq!(max_mip_levels([64, 64, 1]), 7);
        assert_eq!(max_mip_levels([100, 3, 1]), 7);
        assert_eq!(mip_level_extent([64, 32, 1], 6), [1, 1, 1]);
        assert_eq!(mip_level_extent([64, 32, 8], 2), [16, 8, 2]);
    }

    #[test]
    fn component_mapping_identity() {
        assert!(ComponentMapping::default().is_identity());
        assert!(ComponentMapping {
            r: ComponentSwizzle::Red,
            ..Default::default()
        }
        .is_identity());
        assert!(!ComponentMapping {
            r: ComponentSwizzle::Green,
            ..Default::default()
        }
        .is_identity());
    }

    #[test]
    fn flattened_ranges() {
        let image = Image::new(
            Id::new(NonZero::new(1).unwrap()),
            ImageCreateInfo {
                format: Format::D24_UNORM_S8_UINT,
                extent: [16, 16, 1],
                mip_levels: 3,
                array_layers: 4,
                usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            },
        );

        // Everything is one contiguous range.
        assert_eq!(
            image.iter_ranges(&image.subresource_range()).as_slice(),
            &[0..24],
        );

        // Stencil aspect, mip level 1, layers 1..3.
        assert_eq!(
            image
                .iter_ranges(&ImageSubresourceRange {
                    aspects: ImageAspects::STENCIL,
                    mip_levels: 1..2,
                    array_layers: 1..3,
                })
                .as_slice(),
            &[17..19],
        );
    }

    #[test]
    fn flattened_ranges_3d() {
        let image = Image::new(
            Id::new(NonZero::new(1).unwrap()),
            ImageCreateInfo {
                image_type: ImageType::Dim3d,
                flags: ImageCreateFlags::ARRAY_2D_COMPATIBLE,
                mip_levels: 2,
                ..color_image_info(Format::R8G8B8A8_UNORM, [32, 32, 8])
            },
        );

        // A single slice of mip level 1 covers the whole mip level.
        assert_eq!(
            image
                .iter_ranges(&ImageSubresourceRange {
                    aspects: ImageAspects::COLOR,
                    mip_levels: 1..2,
                    array_layers: 3..4,
                })
                .as_slice(),
            &[1..2],
        );
    }

    #[test]
    fn undefined_format() {
        let (device, monitor) = test_device!();

        monitor.expect("VUID-VkImageCreateInfo-pNext-01975");
        let err = device
            .create_image(&monitor, color_image_info(Format::UNDEFINED, [64, 64, 1]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidParams);
        monitor.verify_found().unwrap();
    }

    #[test]
    fn zero_extent() {
        let (device, monitor) = test_device!();

        monitor.expect("VUID-VkImageCreateInfo-extent-00944");
        monitor.expect("VUID-VkImageCreateInfo-extent-00945");
        // With a zero extent, the mip level count may also exceed the maximum.
        monitor.set_unexpected_error("VUID-VkImageCreateInfo-mipLevels-00958");
        let err = device
            .create_image(&monitor, color_image_info(Format::R8G8B8A8_UNORM, [0, 0, 1]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidParams);
        monitor.verify_found().unwrap();
    }

    #[test]
    fn too_many_mip_levels() {
        let (device, monitor) = test_device!();

        monitor.expect("VUID-VkImageCreateInfo-mipLevels-00958");
        assert!(device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    mip_levels: 8,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [64, 64, 1])
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn extent_exceeds_limits() {
        let (device, monitor) = test_device!();

        monitor.expect("VUID-VkImageCreateInfo-extent-02252");
        monitor.expect("VUID-VkImageCreateInfo-extent-02253");
        assert!(device
            .create_image(
                &monitor,
                color_image_info(Format::R8G8B8A8_UNORM, [u32::MAX, u32::MAX, 1]),
            )
            .is_err());
        monitor.verify_found().unwrap();

        // 3D images have a lower limit, which also applies to the depth.
        monitor.expect("VUID-VkImageCreateInfo-extent-02254");
        assert!(device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    image_type: ImageType::Dim3d,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [2048, 2048, 4096])
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn huge_image_requirements_saturate() {
        let (device, monitor) = test_device!(crate::environment::EnvironmentCreateInfo {
            max_image_dimension_2d: u32::MAX,
            ..Default::default()
        });

        monitor.expect_success();
        let image = device
            .create_image(
                &monitor,
                color_image_info(Format::R8G8B8A8_UNORM, [u32::MAX, u32::MAX, 1]),
            )
            .unwrap();
        let requirements = device.image_memory_requirements(&monitor, image).unwrap();
        monitor.verify_found().unwrap();

        assert_eq!(requirements.size, DeviceSize::MAX / 1024 * 1024);
        assert_eq!(requirements.size % requirements.alignment, 0);
    }

    #[test]
    fn portability_subset_restrictions() {
        let (device, monitor) =
            test_device!(crate::environment::EnvironmentCreateInfo::portability());

        monitor.expect("VUID-VkImageCreateInfo-multisampleArrayImage-04460");
        assert!(device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    samples: SampleCount::Sample4,
                    array_layers: 2,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [64, 64, 1])
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect_success();
        let volume = device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    flags: ImageCreateFlags::ARRAY_2D_COMPATIBLE,
                    image_type: ImageType::Dim3d,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [32, 32, 4])
                },
            )
            .unwrap();
        let image = device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    flags: ImageCreateFlags::MUTABLE_FORMAT,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [64, 64, 1])
                },
            )
            .unwrap();
        monitor.verify_found().unwrap();

        monitor.expect("VUID-VkImageViewCreateInfo-imageView2DOn3DImage-04459");
        assert!(device
            .create_image_view(
                &monitor,
                ImageViewCreateInfo {
                    view_type: ImageViewType::Dim2dArray,
                    subresource_range: ImageSubresourceRange {
                        aspects: ImageAspects::COLOR,
                        mip_levels: 0..1,
                        array_layers: 0..4,
                    },
                    ..ImageViewCreateInfo::image(volume)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect("VUID-VkImageViewCreateInfo-imageViewFormatSwizzle-04465");
        assert!(device
            .create_image_view(
                &monitor,
                ImageViewCreateInfo {
                    component_mapping: ComponentMapping {
                        r: ComponentSwizzle::Blue,
                        b: ComponentSwizzle::Red,
                        ..Default::default()
                    },
                    ..ImageViewCreateInfo::image(image)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect("VUID-VkImageViewCreateInfo-imageViewFormatReinterpretation-04466");
        assert!(device
            .create_image_view(
                &monitor,
                ImageViewCreateInfo {
                    format: Format::R32_SFLOAT,
                    ..ImageViewCreateInfo::image(image)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        // Same components in a different order is not a reinterpretation.
        monitor.expect_success();
        device
            .create_image_view(
                &monitor,
                ImageViewCreateInfo {
                    format: Format::B8G8R8A8_UNORM,
                    ..ImageViewCreateInfo::image(image)
                },
            )
            .unwrap();
        monitor.verify_found().unwrap();

        // Outside the portability subset, the swizzle is allowed.
        let (device, monitor) = test_device!();
        let image = device
            .create_image(&monitor, color_image_info(Format::R8G8B8A8_UNORM, [64, 64, 1]))
            .unwrap();
        monitor.expect_success();
        device
            .create_image_view(
                &monitor,
                ImageViewCreateInfo {
                    component_mapping: ComponentMapping {
                        r: ComponentSwizzle::Blue,
                        b: ComponentSwizzle::Red,
                        ..Default::default()
                    },
                    ..ImageViewCreateInfo::image(image)
                },
            )
            .unwrap();
        monitor.verify_found().unwrap();
    }

    #[test]
    fn external_format_rules() {
        let (device, monitor) = android_device!();

        monitor.expect("VUID-VkImageCreateInfo-pNext-01974");
        monitor.expect("VUID-VkExternalFormatANDROID-externalFormat-01894");
        monitor.expect("VUID-VkImageCreateInfo-pNext-02396");
        monitor.expect("VUID-VkImageCreateInfo-pNext-02397");
        monitor.expect("VUID-VkImageCreateInfo-pNext-02398");
        assert!(device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    flags: ImageCreateFlags::MUTABLE_FORMAT,
                    external_format: NonZero::new(0xdead),
                    tiling: ImageTiling::Linear,
                    usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [64, 64, 1])
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn view_of_3d_image() {
        let (device, monitor) = test_device!();

        let image = device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    image_type: ImageType::Dim3d,
                    mip_levels: 2,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [32, 32, 8])
                },
            )
            .unwrap();

        monitor.expect("VUID-VkImageViewCreateInfo-image-01005");
        monitor.expect("VUID-VkImageViewCreateInfo-image-04970");
        assert!(device
            .create_image_view(
                &monitor,
                ImageViewCreateInfo {
                    subresource_range: ImageSubresourceRange {
                        aspects: ImageAspects::COLOR,
                        mip_levels: 0..2,
                        array_layers: 0..1,
                    },
                    ..ImageViewCreateInfo::image(image)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn view_usage_and_format() {
        let (device, monitor) = test_device!();

        let image = device
            .create_image(&monitor, color_image_info(Format::R8G8B8A8_UNORM, [32, 32, 1]))
            .unwrap();

        monitor.expect("VUID-VkImageViewCreateInfo-image-01762");
        monitor.expect("VUID-VkImageViewCreateInfo-pNext-02662");
        assert!(device
            .create_image_view(
                &monitor,
                ImageViewCreateInfo {
                    format: Format::B8G8R8A8_UNORM,
                    usage: ImageUsage::STORAGE,
                    ..ImageViewCreateInfo::image(image)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect_success();
        let view = device
            .create_image_view(&monitor, ImageViewCreateInfo::image(image))
            .unwrap();
        monitor.verify_found().unwrap();

        let view = device.resources().get(view).unwrap();
        assert_eq!(view.format(), Format::R8G8B8A8_UNORM);
        assert_eq!(view.usage(), device.resources().get(image).unwrap().usage());
    }
}
