//! The formats that images and image views can have.

use crate::{image::ImageAspects, macros::vulkan_enum, DeviceSize};

vulkan_enum! {
    /// The format of the texels of an image.
    ///
    /// Only the formats that are needed to describe the objects tracked by this crate are
    /// provided.
    #[non_exhaustive]
    #[allow(non_camel_case_types)]
    Format impl {
        /// Returns the number of bytes that a single texel of this format occupies, or 0 for
        /// [`Format::UNDEFINED`].
        pub const fn block_size(self) -> DeviceSize {
            match self {
                Self::UNDEFINED => 0,
                Self::R8_UNORM | Self::S8_UINT => 1,
                Self::R8G8_UNORM | Self::R5G6B5_UNORM_PACK16 | Self::D16_UNORM => 2,
                Self::R8G8B8_UNORM => 3,
                Self::R8G8B8A8_UNORM
                | Self::R8G8B8A8_SRGB
                | Self::B8G8R8A8_UNORM
                | Self::B8G8R8A8_SRGB
                | Self::A2B10G10R10_UNORM_PACK32
                | Self::R32_SFLOAT
                | Self::D32_SFLOAT
                | Self::D24_UNORM_S8_UINT => 4,
                Self::R16G16B16A16_SFLOAT | Self::D32_SFLOAT_S8_UINT => 8,
                Self::R32G32B32A32_SFLOAT => 16,
            }
        }

        /// Returns the bits of the R, G, B and A components, or of the depth and stencil
        /// components for depth/stencil formats. Missing components have 0 bits.
        pub const fn component_bits(self) -> [u8; 4] {
            match self {
                Self::UNDEFINED => [0, 0, 0, 0],
                Self::R8_UNORM | Self::S8_UINT => [8, 0, 0, 0],
                Self::R8G8_UNORM => [8, 8, 0, 0],
                Self::R5G6B5_UNORM_PACK16 => [5, 6, 5, 0],
                Self::D16_UNORM => [16, 0, 0, 0],
                Self::R8G8B8_UNORM => [8, 8, 8, 0],
                Self::R8G8B8A8_UNORM
                | Self::R8G8B8A8_SRGB
                | Self::B8G8R8A8_UNORM
                | Self::B8G8R8A8_SRGB => [8, 8, 8, 8],
                Self::A2B10G10R10_UNORM_PACK32 => [10, 10, 10, 2],
                Self::R32_SFLOAT | Self::D32_SFLOAT => [32, 0, 0, 0],
                Self::D24_UNORM_S8_UINT => [24, 8, 0, 0],
                Self::R16G16B16A16_SFLOAT => [16, 16, 16, 16],
                Self::D32_SFLOAT_S8_UINT => [32, 8, 0, 0],
                Self::R32G32B32A32_SFLOAT => [32, 32, 32, 32],
            }
        }

        /// Returns the aspects that images of this format have.
        pub fn aspects(self) -> ImageAspects {
            match self {
                Self::UNDEFINED => ImageAspects::empty(),
                Self::D16_UNORM | Self::D32_SFLOAT => ImageAspects::DEPTH,
                Self::S8_UINT => ImageAspects::STENCIL,
                Self::D24_UNORM_S8_UINT | Self::D32_SFLOAT_S8_UINT => {
                    ImageAspects::DEPTH | ImageAspects::STENCIL
                }
                _ => ImageAspects::COLOR,
            }
        }

        /// Returns whether images of this format have a depth or stencil aspect.
        #[inline]
        pub fn is_depth_stencil(self) -> bool {
            self.aspects()
                .intersects(ImageAspects::DEPTH | ImageAspects::STENCIL)
        }
    }
    = Format(i32);

    UNDEFINED = UNDEFINED,
    R8_UNORM = R8_UNORM,
    R8G8_UNORM = R8G8_UNORM,
    R5G6B5_UNORM_PACK16 = R5G6B5_UNORM_PACK16,
    R8G8B8_UNORM = R8G8B8_UNORM,
    R8G8B8A8_UNORM = R8G8B8A8_UNORM,
    R8G8B8A8_SRGB = R8G8B8A8_SRGB,
    B8G8R8A8_UNORM = B8G8R8A8_UNORM,
    B8G8R8A8_SRGB = B8G8R8A8_SRGB,
    A2B10G10R10_UNORM_PACK32 = A2B10G10R10_UNORM_PACK32,
    R16G16B16A16_SFLOAT = R16G16B16A16_SFLOAT,
    R32_SFLOAT = R32_SFLOAT,
    R32G32B32A32_SFLOAT = R32G32B32A32_SFLOAT,
    D16_UNORM = D16_UNORM,
    D32_SFLOAT = D32_SFLOAT,
    S8_UINT = S8_UINT,
    D24_UNORM_S8_UINT = D24_UNORM_S8_UINT,
    D32_SFLOAT_S8_UINT = D32_SFLOAT_S8_UINT,
}

impl Default for Format {
    #[inline]
    fn default() -> Self {
        Format::UNDEFINED
    }
}

#[cfg(test)]
mod tests {
    use super::Format;
    use crate::image::ImageAspects;

    #[test]
    fn aspects() {
        assert_eq!(Format::R8G8B8A8_UNORM.aspects(), ImageAspects::COLOR);
        assert_eq!(
            Format::D24_UNORM_S8_UINT.aspects(),
            ImageAspects::DEPTH | ImageAspects::STENCIL,
        );
        assert!(Format::UNDEFINED.aspects().is_empty());
        assert!(Format::S8_UINT.is_depth_stencil());
        assert!(!Format::B8G8R8A8_SRGB.is_depth_stencil());
    }

    #[test]
    fn ash_conversion() {
        let raw: ash::vk::Format = Format::R16G16B16A16_SFLOAT.into();
        assert_eq!(raw, ash::vk::Format::R16G16B16A16_SFLOAT);
        assert_eq!(
            Format::try_from(ash::vk::Format::D32_SFLOAT),
            Ok(Format::D32_SFLOAT),
        );
        assert!(Format::try_from(ash::vk::Format::BC1_RGB_UNORM_BLOCK).is_err());
    }
}
