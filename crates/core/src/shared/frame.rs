use ndarray::ArrayView3;

/// A single decoded video frame: contiguous RGB bytes in row-major order.
///
/// `index` is the position in the source's frame sequence and doubles as the
/// pipeline's logical clock; `timestamp_ms` is the presentation time when the
/// source knows it.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: u64,
    timestamp_ms: Option<f64>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: u64) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
            timestamp_ms: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: f64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp_ms(&self) -> Option<f64> {
        self.timestamp_ms
    }

    /// Copies the pixel rectangle `[x, x + w) × [y, y + h)` into a tightly
    /// packed buffer. The rectangle must lie inside the frame.
    pub fn copy_rect(&self, x: u32, y: u32, w: u32, h: u32) -> Vec<u8> {
        debug_assert!(x + w <= self.width && y + h <= self.height);
        let ch = self.channels as usize;
        let stride = self.width as usize * ch;
        let row_len = w as usize * ch;
        let mut out = Vec::with_capacity(row_len * h as usize);
        for row in y as usize..(y + h) as usize {
            let start = row * stride + x as usize * ch;
            out.extend_from_slice(&self.data[start..start + row_len]);
        }
        out
    }

    pub fn as_ndarray(&self) -> Option<ArrayView3<'_, u8>> {
        ArrayView3::from_shape(
            (
                self.height as usize,
                self.width as usize,
                self.channels as usize,
            ),
            &self.data,
        )
        .ok()
    }
}
