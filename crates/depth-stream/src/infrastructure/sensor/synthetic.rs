//! Simulated depth camera.
//!
//! Produces frames at the configured mode's resolution and frame rate.  The
//! scene is a tilted floor-like plane with a sphere orbiting the image
//! centre, clipped to the mode's valid range.  Pixels outside an elliptical
//! field of view read `0`, like the vignetted corners of a real sensor.

use std::thread;
use std::time::{Duration, Instant};

use depth_core::{Capture, DepthFrame, DepthSensor, DeviceConfig, SensorError};

/// Angular speed of the orbiting sphere, radians per second.
const ORBIT_RAD_PER_SEC: f32 = 0.8;

struct Running {
    config: DeviceConfig,
    next_frame: Instant,
    frame_index: u64,
}

/// Driver producing a synthetic scene; see the module docs.
#[derive(Default)]
pub struct SyntheticSensor {
    running: Option<Running>,
}

impl SyntheticSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders frame number `index` for `config`.  `None` for modes without
    /// a depth stream.
    pub fn render(config: &DeviceConfig, index: u64) -> Option<DepthFrame> {
        let (width, height) = config.depth_mode.resolution()?;
        let range = config.depth_mode.range_mm()?;
        let (near, far) = (f32::from(*range.start()), f32::from(*range.end()));

        let t = index as f32 / config.frame_rate.as_u32() as f32 * ORBIT_RAD_PER_SEC;
        let (w, h) = (width as f32, height as f32);
        let (cx, cy) = (w / 2.0, h / 2.0);
        let sphere_x = cx + 0.25 * w * t.cos();
        let sphere_y = cy + 0.20 * h * t.sin();
        let radius = h / 6.0;

        let mut samples = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);

                let nx = (px - cx) / cx;
                let ny = (py - cy) / cy;
                if nx * nx + ny * ny > 1.0 {
                    samples.push(0);
                    continue;
                }

                // Plane: far at the top of the image, nearer towards the bottom.
                let mut depth = far - (far - near) * (0.2 + 0.6 * py / h);

                let (dx, dy) = (px - sphere_x, py - sphere_y);
                let d2 = dx * dx + dy * dy;
                if d2 < radius * radius {
                    let bulge = (radius * radius - d2).sqrt() / radius;
                    depth -= bulge * (far - near) * 0.25;
                }

                samples.push(depth.clamp(near, far).round() as u16);
            }
        }

        DepthFrame::new(width, height, samples).ok()
    }
}

impl DepthSensor for SyntheticSensor {
    fn start(&mut self, config: &DeviceConfig) -> Result<(), SensorError> {
        config.validate()?;
        self.running = Some(Running {
            config: *config,
            next_frame: Instant::now(),
            frame_index: 0,
        });
        Ok(())
    }

    fn get_capture(&mut self, timeout: Duration) -> Result<Capture, SensorError> {
        let running = self
            .running
            .as_mut()
            .ok_or_else(|| SensorError::Fault("sensor has not been started".to_string()))?;

        let now = Instant::now();
        let wait = running.next_frame.saturating_duration_since(now);
        if wait > timeout {
            thread::sleep(timeout);
            return Err(SensorError::Timeout(timeout));
        }
        thread::sleep(wait);

        let index = running.frame_index;
        running.frame_index += 1;
        // Keep a fixed cadence, but never try to "catch up" on missed frames.
        running.next_frame = (running.next_frame + running.config.frame_rate.period())
            .max(Instant::now());

        Ok(match Self::render(&running.config, index) {
            Some(frame) => Capture::with_depth(frame),
            None => Capture::empty(),
        })
    }

    fn stop(&mut self) {
        self.running = None;
    }
}
