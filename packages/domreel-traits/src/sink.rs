//! The frame-emit boundary between the recorder core and its transport

/// A consumer of recorded frames (a websocket writer, a file writer, an
/// in-memory buffer in tests). Frames are emitted in production order and the
/// sink must preserve that order.
pub trait FrameSink<F>: 'static {
    fn emit(&mut self, frame: F);
}

impl<F, T: FnMut(F) + 'static> FrameSink<F> for T {
    fn emit(&mut self, frame: F) {
        self(frame)
    }
}

/// A sink which buffers frames in memory
pub struct VecSink<F> {
    pub frames: Vec<F>,
}

impl<F> Default for VecSink<F> {
    fn default() -> Self {
        Self { frames: Vec::new() }
    }
}

impl<F: 'static> FrameSink<F> for VecSink<F> {
    fn emit(&mut self, frame: F) {
        self.frames.push(frame);
    }
}
