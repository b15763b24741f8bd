//! Feature-flagged debug overlay. Behind the `visualizer` Cargo feature,
//! in the same additive, off-by-default style as other optional backend
//! features (e.g. `metal`/`cuda`): zero-cost when unused, and never
//! allowed to affect the wire protocol.

#[cfg(feature = "visualizer")]
mod imp {
    use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};

    use minifb::{Window, WindowOptions};
    use tracing::warn;
    use worker_ai_decode::RgbImage;
    use worker_ai_track::Track;

    struct Frame {
        width: usize,
        height: usize,
        pixels: Vec<u32>,
    }

    /// Renders frames with track overlays to a local window. `Window`
    /// lives entirely on one dedicated thread; connection tasks hand it
    /// finished pixel buffers over a bounded channel and never touch the
    /// display APIs themselves. A full channel (the window thread can't
    /// keep up) just drops the frame — rendering is best-effort and must
    /// never make a connection wait on it.
    pub struct Visualizer {
        window_name: String,
        tx: SyncSender<Frame>,
    }

    impl Visualizer {
        pub fn new(window_name: String) -> Self {
            let (tx, rx) = sync_channel::<Frame>(1);
            let thread_name = window_name.clone();
            std::thread::Builder::new()
                .name(format!("visualizer-{thread_name}"))
                .spawn(move || run_window(&thread_name, rx))
                .expect("spawning visualizer window thread");
            Self { window_name, tx }
        }

        pub fn render(&self, image: &RgbImage, tracks: &[&Track]) {
            if let Err(e) = self.try_render(image, tracks) {
                warn!(error = %e, window = %self.window_name, "visualizer render failed, skipping frame");
            }
        }

        fn try_render(&self, image: &RgbImage, tracks: &[&Track]) -> anyhow::Result<()> {
            let mut buf = image::RgbImage::from_raw(image.width(), image.height(), image.data().to_vec())
                .ok_or_else(|| anyhow::anyhow!("decoded frame dimensions do not match buffer length"))?;
            for track in tracks {
                draw_bbox_outline(&mut buf, track.bbox);
            }

            let (width, height) = buf.dimensions();
            let pixels: Vec<u32> = buf
                .pixels()
                .map(|p| u32::from_be_bytes([0, p[0], p[1], p[2]]))
                .collect();
            let frame = Frame {
                width: width as usize,
                height: height as usize,
                pixels,
            };

            match self.tx.try_send(frame) {
                Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
                Err(TrySendError::Disconnected(_)) => Err(anyhow::anyhow!("visualizer window thread is gone")),
            }
        }
    }

    /// Owns the `Window` for the lifetime of the process, pumping its
    /// event loop each time a new frame arrives. Exits once every
    /// `Visualizer` handle (and so every sender) has been dropped.
    fn run_window(window_name: &str, rx: std::sync::mpsc::Receiver<Frame>) {
        let mut window: Option<Window> = None;
        while let Ok(frame) = rx.recv() {
            let win = match &mut window {
                Some(w) => w,
                None => match Window::new(window_name, frame.width, frame.height, WindowOptions::default()) {
                    Ok(w) => window.insert(w),
                    Err(e) => {
                        warn!(error = %e, window = %window_name, "failed to open visualizer window, dropping frame");
                        continue;
                    }
                },
            };
            if let Err(e) = win.update_with_buffer(&frame.pixels, frame.width, frame.height) {
                warn!(error = %e, window = %window_name, "visualizer window update failed");
            }
        }
    }

    fn draw_bbox_outline(buf: &mut image::RgbImage, bbox: worker_ai_track::BBoxXyxy) {
        let (w, h) = buf.dimensions();
        let x1 = (bbox.x1 * w as f32) as u32;
        let y1 = (bbox.y1 * h as f32) as u32;
        let x2 = (bbox.x2 * w as f32).min((w - 1) as f32) as u32;
        let y2 = (bbox.y2 * h as f32).min((h - 1) as f32) as u32;
        for x in x1..=x2.max(x1) {
            if x < w {
                if y1 < h {
                    buf.put_pixel(x, y1, image::Rgb([0, 255, 0]));
                }
                if y2 < h {
                    buf.put_pixel(x, y2, image::Rgb([0, 255, 0]));
                }
            }
        }
    }
}

#[cfg(not(feature = "visualizer"))]
mod imp {
    pub struct Visualizer;

    impl Visualizer {
        pub fn new(_window_name: String) -> Self {
            Self
        }

        pub fn render(&self, _image: &worker_ai_decode::RgbImage, _tracks: &[&worker_ai_track::Track]) {}
    }
}

pub use imp::Visualizer;
