//! Swapchains and the presentation of their images.
//!
//! A swapchain owns a fixed set of images, which are created along with it and whose memory is
//! bound by the swapchain itself. An image must be acquired with
//! [`Device::acquire_next_image`] before it can be used, and goes back to the swapchain when it
//! is presented.
//!
//! [`Device::acquire_next_image`]: crate::device::Device::acquire_next_image

use crate::{
    format::Format,
    image::{Image, ImageCreateInfo, ImageLayout, ImageUsage},
    resource::{Resources, Storage},
    rules::{Operation, RuleContext, RuleResult, Violation, Violations},
    sync::Sharing,
    Id, NonExhaustive, Object, ObjectType,
};
use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};

/// Parameters to create a new [`Swapchain`].
#[derive(Clone, Debug)]
pub struct SwapchainCreateInfo {
    /// The number of images that the swapchain creates.
    ///
    /// The default value is `2`.
    pub min_image_count: u32,

    /// The default value is [`Format::B8G8R8A8_UNORM`].
    pub image_format: Format,

    /// The default value is `[0; 2]`, which must be overridden.
    pub image_extent: [u32; 2],

    /// The default value is `1`.
    pub image_array_layers: u32,

    /// The default value is [`ImageUsage::COLOR_ATTACHMENT`].
    pub image_usage: ImageUsage,

    /// The default value is [`Sharing::Exclusive`].
    pub image_sharing: Sharing<SmallVec<[u32; 4]>>,

    pub _ne: NonExhaustive,
}

impl Default for SwapchainCreateInfo {
    #[inline]
    fn default() -> Self {
        SwapchainCreateInfo {
            min_image_count: 2,
            image_format: Format::B8G8R8A8_UNORM,
            image_extent: [0; 2],
            image_array_layers: 1,
            image_usage: ImageUsage::COLOR_ATTACHMENT,
            image_sharing: Sharing::Exclusive,
            _ne: NonExhaustive(()),
        }
    }
}

impl SwapchainCreateInfo {
    /// Returns the create info that the images of the swapchain are created with.
    pub(crate) fn image_create_info(&self) -> ImageCreateInfo {
        ImageCreateInfo {
            format: self.image_format,
            extent: [self.image_extent[0], self.image_extent[1], 1],
            array_layers: self.image_array_layers,
            usage: self.image_usage,
            sharing: self.image_sharing.clone(),
            ..Default::default()
        }
    }
}

/// The record of a swapchain.
#[derive(Debug)]
pub struct Swapchain {
    id: Id<Swapchain>,
    image_format: Format,
    image_extent: [u32; 2],
    images: Vec<Id<Image>>,
    acquired: Mutex<SmallVec<[bool; 4]>>,
}

impl Swapchain {
    pub(crate) fn new(
        id: Id<Swapchain>,
        create_info: &SwapchainCreateInfo,
        images: Vec<Id<Image>>,
    ) -> Self {
        Swapchain {
            id,
            image_format: create_info.image_format,
            image_extent: create_info.image_extent,
            acquired: Mutex::new(smallvec![false; images.len()]),
            images,
        }
    }

    #[inline]
    pub fn id(&self) -> Id<Swapchain> {
        self.id
    }

    #[inline]
    pub fn image_format(&self) -> Format {
        self.image_format
    }

    #[inline]
    pub fn image_extent(&self) -> [u32; 2] {
        self.image_extent
    }

    /// Returns the images of the swapchain, in image index order.
    #[inline]
    pub fn images(&self) -> &[Id<Image>] {
        &self.images
    }

    /// Returns whether the image with the given index is currently acquired.
    #[inline]
    pub fn is_acquired(&self, image_index: u32) -> bool {
        self.acquired
            .lock()
            .get(image_index as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Returns the number of images that are currently acquired.
    pub fn acquired_count(&self) -> usize {
        self.acquired.lock().iter().filter(|&&acquired| acquired).count()
    }

    /// Marks the first image that isn't acquired as acquired, and returns its index.
    pub(crate) fn acquire(&self) -> Option<u32> {
        let mut acquired = self.acquired.lock();
        let index = acquired.iter().position(|&acquired| !acquired)?;
        acquired[index] = true;

        Some(index as u32)
    }

    pub(crate) fn release(&self, image_index: u32) {
        if let Some(acquired) = self.acquired.lock().get_mut(image_index as usize) {
            *acquired = false;
        }
    }
}

impl Object for Swapchain {
    const TYPE: ObjectType = ObjectType::Swapchain;

    fn storage(resources: &Resources) -> &Storage<Self> {
        &resources.swapchains
    }
}

/// The image of a swapchain to present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPresentInfo {
    pub swapchain: Id<Swapchain>,
    pub image_index: u32,
}

/// Parameters to present swapchain images.
#[derive(Clone, Debug, Default)]
pub struct PresentInfo {
    /// The images to present, at most one per swapchain.
    ///
    /// The default value is empty.
    pub swapchain_infos: SmallVec<[SwapchainPresentInfo; 1]>,

    pub _ne: NonExhaustive,
}

impl PresentInfo {
    /// Returns a `PresentInfo` that presents a single image.
    #[inline]
    pub fn swapchain_image_index(swapchain: Id<Swapchain>, image_index: u32) -> Self {
        PresentInfo {
            swapchain_infos: smallvec![SwapchainPresentInfo {
                swapchain,
                image_index,
            }],
            ..Default::default()
        }
    }
}

pub(crate) fn extent_nonzero(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::CreateSwapchain(create_info) = *ctx.operation() else {
        return Ok(());
    };

    if create_info.image_extent.contains(&0) {
        return Err(Violation::new(format!(
            "`image_extent` is {:?}, which has a zero dimension",
            create_info.image_extent,
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn array_layers_nonzero(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::CreateSwapchain(create_info) = *ctx.operation() else {
        return Ok(());
    };

    if create_info.image_array_layers == 0 {
        return Err(Violation::new("`image_array_layers` is 0").into());
    }

    Ok(())
}

pub(crate) fn acquire_exhausted(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::AcquireNextImage { swapchain } = *ctx.operation() else {
        return Ok(());
    };
    let Ok(swapchain) = ctx.resources().get(swapchain) else {
        return Ok(());
    };

    if swapchain.acquired_count() == swapchain.images().len() {
        return Err(Violation::new(format!(
            "all {} images of the swapchain are already acquired",
            swapchain.images().len(),
        ))
        .object(swapchain.id())
        .into());
    }

    Ok(())
}

pub(crate) fn present_not_acquired(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::Present(present_info) = *ctx.operation() else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for swapchain_info in &present_info.swapchain_infos {
        let Ok(swapchain) = ctx.resources().get(swapchain_info.swapchain) else {
            continue;
        };

        if !swapchain.is_acquired(swapchain_info.image_index) {
            violations.push(
                Violation::new(format!(
                    "image {} of the swapchain is not acquired",
                    swapchain_info.image_index,
                ))
                .object(swapchain.id()),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn present_layout(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::Present(present_info) = *ctx.operation() else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for swapchain_info in &present_info.swapchain_infos {
        // Images that aren't acquired are diagnosed by `present_not_acquired` only.
        let Some(image) = ctx
            .resources()
            .get(swapchain_info.swapchain)
            .ok()
            .filter(|swapchain| swapchain.is_acquired(swapchain_info.image_index))
            .and_then(|swapchain| {
                swapchain
                    .images()
                    .get(swapchain_info.image_index as usize)
                    .copied()
            })
            .and_then(|image| ctx.resources().get(image).ok())
        else {
            continue;
        };

        if let Some((_, state)) = image
            .state()
            .states()
            .into_iter()
            .find(|(_, state)| state.layout != ImageLayout::PresentSrc)
        {
            violations.push(
                Violation::new(format!(
                    "image {} of the swapchain is in layout {:?}, but presented images must be \
                    in layout `ImageLayout::PresentSrc`",
                    swapchain_info.image_index, state.layout,
                ))
                .object(image.id())
                .object(swapchain_info.swapchain),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn destroy_swapchain_image(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::Destroy(id) = *ctx.operation() else {
        return Ok(());
    };
    let Some(image) = id
        .downcast::<Image>()
        .and_then(|image| ctx.resources().get(image).ok())
    else {
        return Ok(());
    };

    if image.is_swapchain_image() {
        return Err(Violation::new(
            "the image is owned by a swapchain, and is destroyed along with it",
        )
        .object(image.id())
        .into());
    }

    Ok(())
}
