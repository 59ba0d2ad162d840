//! The `:highgui` interactive window, shown with `piston_window`.

use super::{FrameSink, SinkError};
use piston_window::{
    EventLoop, G2dTexture, G2dTextureContext, PistonWindow, RenderEvent, Texture, TextureSettings,
    Window, WindowSettings,
};
use rabbitears_core::raster::Raster;
use tracing::debug;

pub struct WindowSink {
    window: PistonWindow,
    texture_context: G2dTextureContext,
    texture: G2dTexture,
    buffer: image::RgbaImage,
    closed: bool,
}

impl WindowSink {
    pub fn open(width: usize, height: usize) -> Result<Self, SinkError> {
        let open_failed = |reason: String| SinkError::OpenFailed {
            spec: ":highgui".into(),
            reason,
        };
        let mut window: PistonWindow =
            WindowSettings::new("rabbitears", [width as u32, height as u32])
                .exit_on_esc(true)
                .build()
                .map_err(|err| open_failed(err.to_string()))?;
        window.set_max_fps(60);
        let buffer = image::RgbaImage::new(width as u32, height as u32);
        let mut texture_context = window.create_texture_context();
        let texture = Texture::from_image(&mut texture_context, &buffer, &TextureSettings::new())
            .map_err(|err| open_failed(err.to_string()))?;
        Ok(Self {
            window,
            texture_context,
            texture,
            buffer,
            closed: false,
        })
    }
}

impl FrameSink for WindowSink {
    fn write(&mut self, frame: &Raster) -> crate::error::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.buffer.copy_from_slice(frame.data());
        self.texture
            .update(&mut self.texture_context, &self.buffer)
            .map_err(|err| anyhow::anyhow!("texture update failed: {err}"))?;

        // Pump events until this frame has been presented once.
        let mut presented = false;
        while let Some(event) = self.window.next() {
            if event.render_args().is_some() {
                let size = self.window.size();
                let texture = &self.texture;
                let texture_context = &mut self.texture_context;
                self.window.draw_2d(&event, |ctx, gfx, device| {
                    texture_context.encoder.flush(device);
                    piston_window::clear([0.0, 0.0, 0.0, 1.0], gfx);
                    piston_window::Image::new()
                        .rect([0.0, 0.0, size.width, size.height])
                        .draw(texture, &ctx.draw_state, ctx.transform, gfx);
                });
                presented = true;
            }
            if presented {
                return Ok(());
            }
        }
        debug!("window closed by the user");
        self.closed = true;
        Ok(())
    }

    fn finish(&mut self) -> crate::error::Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        ":highgui"
    }
}
