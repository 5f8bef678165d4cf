fn drop_transparency_channel(pixels: Vec<u8>) -> Vec<u8> {
    pixels.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect()
}

fn add_transparency_channel(pixels: Vec<u8>) -> Vec<u8> {
    pixels
        .chunks_exact(3)
        .flat_map(|px| [px[0], px[1], px[2], 255])
        .collect()
}

fn l8_to_rgb8(pixels: Vec<u8>) -> Vec<u8> {
    pixels.iter().flat_map(|&v| [v, v, v]).collect()
}

/// A single-channel 8-bit sample plane.
///
/// The decoder allocates one per color component, sized to MCU-aligned
/// dimensions so block writes and upsampling never need edge handling.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Plane {
    pub fn new(width: u32, height: u32) -> Plane {
        Plane {
            width,
            height,
            data: vec![0; (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        self.data[(y * self.width + x) as usize] = value;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PixelFormat {
    L8,
    RGB8,
    RGBA8,
}

/// Pixel storage tagged by format. The decoder only ever produces the
/// formats listed here: L8 for decoded luma, RGB8/RGBA8 for color output.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    L8(Vec<u8>),
    RGB8(Vec<u8>),
    RGBA8(Vec<u8>),
}

impl PixelData {
    pub fn pixel_format(&self) -> PixelFormat {
        match self {
            PixelData::L8(_) => PixelFormat::L8,
            PixelData::RGB8(_) => PixelFormat::RGB8,
            PixelData::RGBA8(_) => PixelFormat::RGBA8,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            PixelData::L8(_) => 1,
            PixelData::RGB8(_) => 3,
            PixelData::RGBA8(_) => 4,
        }
    }

    pub fn into_rgb8(self) -> PixelData {
        match self {
            PixelData::L8(pixels) => PixelData::RGB8(l8_to_rgb8(pixels)),
            PixelData::RGB8(pixels) => PixelData::RGB8(pixels),
            PixelData::RGBA8(pixels) => PixelData::RGB8(drop_transparency_channel(pixels)),
        }
    }

    pub fn into_rgba8(self) -> PixelData {
        match self {
            PixelData::L8(pixels) => PixelData::RGBA8(add_transparency_channel(l8_to_rgb8(pixels))),
            PixelData::RGB8(pixels) => PixelData::RGBA8(add_transparency_channel(pixels)),
            PixelData::RGBA8(pixels) => PixelData::RGBA8(pixels),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PixelData::L8(pixels) => pixels,
            PixelData::RGB8(pixels) => pixels,
            PixelData::RGBA8(pixels) => pixels,
        }
    }
}

/// A decoded raster image, row-major, tagged with its pixel format.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    pixels: PixelData,
}

impl Image {
    /// Creates a fully transparent black RGBA image of the given size.
    pub fn new(width: u32, height: u32) -> Image {
        Image {
            width,
            height,
            pixels: PixelData::RGBA8(vec![0; (width * height * 4) as usize]),
        }
    }

    pub fn from_pixels(width: u32, height: u32, pixels: PixelData) -> Image {
        debug_assert_eq!(
            pixels.as_bytes().len(),
            (width * height) as usize * pixels.channels()
        );

        Image {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixels.pixel_format()
    }

    pub fn pixels(&self) -> &PixelData {
        &self.pixels
    }

    /// Reads one pixel as RGBA, expanding narrower formats on the fly.
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y * self.width + x) as usize;

        match &self.pixels {
            PixelData::L8(px) => {
                let v = px[i];
                [v, v, v, 255]
            }
            PixelData::RGB8(px) => [px[3 * i], px[3 * i + 1], px[3 * i + 2], 255],
            PixelData::RGBA8(px) => [px[4 * i], px[4 * i + 1], px[4 * i + 2], px[4 * i + 3]],
        }
    }

    /// Writes one pixel, narrowing the RGBA value to the stored format.
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = (y * self.width + x) as usize;

        match &mut self.pixels {
            PixelData::L8(px) => px[i] = rgba[0],
            PixelData::RGB8(px) => px[3 * i..3 * i + 3].copy_from_slice(&rgba[..3]),
            PixelData::RGBA8(px) => px[4 * i..4 * i + 4].copy_from_slice(&rgba),
        }
    }

    /// Converts the image to RGB8, consuming it.
    pub fn into_rgb8(self) -> Image {
        Image {
            width: self.width,
            height: self.height,
            pixels: self.pixels.into_rgb8(),
        }
    }

    /// Converts the image to RGBA8, consuming it.
    pub fn into_rgba8(self) -> Image {
        Image {
            width: self.width,
            height: self.height,
            pixels: self.pixels.into_rgba8(),
        }
    }

    /// The pixels converted to RGB8 bytes, without modifying the image.
    pub fn as_rgb8(&self) -> Vec<u8> {
        self.pixels.clone().into_rgb8().as_bytes().to_vec()
    }

    /// The pixels converted to RGBA8 bytes, without modifying the image.
    pub fn as_rgba8(&self) -> Vec<u8> {
        self.pixels.clone().into_rgba8().as_bytes().to_vec()
    }
}
