//! The frame rendezvous: a blocking sink the driver hands a rendered frame
//! to once per video sync. `NullFrameSink` is always available (tests, and
//! any run without `--display`); `Sdl2FrameSink` is gated behind the
//! `display` feature and grounded on the original `render.rs`'s SDL2 canvas
//! setup.

pub trait FrameSink {
    /// Blocks until the frame is consumed. `frame` is one byte per pixel,
    /// row-major, `width * height` long.
    fn present(&mut self, frame: &[u8], width: u32, height: u32);
}

/// Discards every frame. Used for headless runs and tests.
pub struct NullFrameSink;

impl FrameSink for NullFrameSink {
    fn present(&mut self, _frame: &[u8], _width: u32, _height: u32) {}
}

#[cfg(feature = "display")]
pub use sdl::Sdl2FrameSink;

#[cfg(feature = "display")]
mod sdl {
    use super::FrameSink;
    use sdl2::event::Event;
    use sdl2::keyboard::Keycode;
    use sdl2::pixels::Color;
    use sdl2::rect::Rect;
    use sdl2::render::Canvas;
    use sdl2::video::Window;
    use sdl2::EventPump;

    /// An SDL2 window that renders each frame as a grid of filled cells
    /// scaled to fit the current window size, matching a greyscale byte per
    /// cell onto an RGB gradient.
    pub struct Sdl2FrameSink {
        canvas: Canvas<Window>,
        event_pump: EventPump,
        quit_requested: bool,
    }

    impl Sdl2FrameSink {
        pub fn new(title: &str) -> Result<Self, String> {
            let sdl_context = sdl2::init()?;
            let video_subsystem = sdl_context.video()?;
            let window = video_subsystem
                .window(title, 800, 600)
                .position_centered()
                .resizable()
                .build()
                .map_err(|e| e.to_string())?;
            let canvas = window.into_canvas().build().map_err(|e| e.to_string())?;
            let event_pump = sdl_context.event_pump()?;
            Ok(Sdl2FrameSink { canvas, event_pump, quit_requested: false })
        }

        /// True once the user has closed the window or pressed Escape; the
        /// driver loop checks this to know when to stop dispatching.
        pub fn quit_requested(&self) -> bool {
            self.quit_requested
        }

        fn pump_events(&mut self) {
            for event in self.event_pump.poll_iter() {
                match event {
                    Event::Quit { .. } | Event::KeyDown { keycode: Some(Keycode::Escape), .. } => {
                        self.quit_requested = true;
                    }
                    _ => {}
                }
            }
        }
    }

    impl FrameSink for Sdl2FrameSink {
        fn present(&mut self, frame: &[u8], width: u32, height: u32) {
            self.pump_events();
            let (win_width, win_height) = self.canvas.window().size();
            let cell_width = (win_width / width.max(1)).max(1);
            let cell_height = (win_height / height.max(1)).max(1);

            self.canvas.set_draw_color(Color::RGB(0, 0, 0));
            self.canvas.clear();
            for y in 0..height {
                for x in 0..width {
                    let idx = (y * width + x) as usize;
                    let level = frame.get(idx).copied().unwrap_or(0);
                    let rect = Rect::new(
                        (x * cell_width) as i32,
                        (y * cell_height) as i32,
                        cell_width,
                        cell_height,
                    );
                    self.canvas.set_draw_color(Color::RGB(level, level, level));
                    let _ = self.canvas.fill_rect(rect);
                }
            }
            self.canvas.present();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_any_frame() {
        let mut sink = NullFrameSink;
        sink.present(&[1, 2, 3, 4], 2, 2);
    }
}
