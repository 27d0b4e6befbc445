//! Swapchain format choice and pixel conversion for runtimes that own their
//! own images.
//!
//! Eye textures are read back as gamma-encoded RGBA8. An sRGB swapchain takes
//! those bytes as they are; a UNORM swapchain is read as linear light by the
//! compositor, so the bytes are decoded first. BGRA swapchains get their red
//! and blue channels swapped.

use std::borrow::Cow;
use std::sync::OnceLock;

use ash::vk;

use super::ColorSpace;

/// The swapchain format picked for the eye images.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SwapchainFormat {
    pub raw: u32,
    pub name: &'static str,
    pub color_space: ColorSpace,
    pub bgra: bool,
}

const CANDIDATES: [(vk::Format, &str, ColorSpace, bool); 4] = [
    (vk::Format::R8G8B8A8_SRGB, "R8G8B8A8_SRGB", ColorSpace::Gamma, false),
    (vk::Format::B8G8R8A8_SRGB, "B8G8R8A8_SRGB", ColorSpace::Gamma, true),
    (vk::Format::R8G8B8A8_UNORM, "R8G8B8A8_UNORM", ColorSpace::Linear, false),
    (vk::Format::B8G8R8A8_UNORM, "B8G8R8A8_UNORM", ColorSpace::Linear, true),
];

/// Picks the first supported 8-bit color format, sRGB before UNORM.
pub fn choose_swapchain_format(available: &[u32]) -> Option<SwapchainFormat> {
    CANDIDATES
        .iter()
        .find(|(format, ..)| available.contains(&(format.as_raw() as u32)))
        .map(|&(format, name, color_space, bgra)| SwapchainFormat {
            raw: format.as_raw() as u32,
            name,
            color_space,
            bgra,
        })
}

fn srgb_to_linear(value: u8) -> u8 {
    let c = value as f32 / 255.0;
    let linear = if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    };
    (linear * 255.0).round() as u8
}

fn linear_to_srgb(value: u8) -> u8 {
    let c = value as f32 / 255.0;
    let encoded = if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round() as u8
}

fn table(from: ColorSpace, to: ColorSpace) -> Option<&'static [u8; 256]> {
    static DECODE: OnceLock<[u8; 256]> = OnceLock::new();
    static ENCODE: OnceLock<[u8; 256]> = OnceLock::new();
    match (from, to) {
        (ColorSpace::Gamma, ColorSpace::Linear) => {
            Some(DECODE.get_or_init(|| std::array::from_fn(|i| srgb_to_linear(i as u8))))
        }
        (ColorSpace::Linear, ColorSpace::Gamma) => {
            Some(ENCODE.get_or_init(|| std::array::from_fn(|i| linear_to_srgb(i as u8))))
        }
        _ => None,
    }
}

/// Converts RGBA8 `pixels` in `from` space into the layout of `format`.
/// Alpha is never converted.
pub fn convert_pixels<'a>(
    pixels: &'a [u8],
    from: ColorSpace,
    format: &SwapchainFormat,
) -> Cow<'a, [u8]> {
    let table = table(from, format.color_space);
    if table.is_none() && !format.bgra {
        return Cow::Borrowed(pixels);
    }

    let mut out = pixels.to_vec();
    for texel in out.chunks_exact_mut(4) {
        if let Some(table) = table {
            for channel in &mut texel[..3] {
                *channel = table[*channel as usize];
            }
        }
        if format.bgra {
            texel.swap(0, 2);
        }
    }
    Cow::Owned(out)
}
