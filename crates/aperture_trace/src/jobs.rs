use std::time::Instant;

use aperture_shared::visibility::Camera;
use glam::Vec3;
use image::RgbImage;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::info;

use crate::accel::Accelerator;
use crate::tracer::{TraceBudget, Tracer};

/// Worker pool that traces image rows in parallel.
pub struct TraceJobs {
    pool: ThreadPool,
}

impl TraceJobs {
    /// `None` or `Some(0)` lets rayon size the pool.
    pub fn new(num_threads: Option<usize>) -> Result<Self, ThreadPoolBuildError> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|index| format!("trace-worker-{index}"));
        if let Some(count) = num_threads.filter(|count| *count > 0) {
            builder = builder.num_threads(count);
        }

        let pool = builder.build()?;
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn render<A: Accelerator>(&self, tracer: &Tracer<'_, A>, camera: &Camera, budget: TraceBudget) -> RgbImage {
        let (width, height) = tracer.dimensions();
        let started = Instant::now();
        let mut image = RgbImage::new(width, height);
        let row_len = width as usize * 3;

        if row_len > 0 {
            let pixels: &mut [u8] = &mut image;
            self.pool.install(|| {
                pixels
                    .par_chunks_mut(row_len)
                    .enumerate()
                    .for_each(|(y, row)| {
                        for (x, pixel) in row.chunks_exact_mut(3).enumerate() {
                            let ray = tracer.primary_ray(camera, x as u32, y as u32);
                            pixel.copy_from_slice(&to_rgb8(tracer.trace_color(&ray, budget)));
                        }
                    });
            });
        }

        info!(
            "Traced {width}x{height} on {} threads in {:.2?}",
            self.num_threads(),
            started.elapsed()
        );
        image
    }
}

fn to_rgb8(color: Vec3) -> [u8; 3] {
    let scaled = (color.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
    [scaled.x as u8, scaled.y as u8, scaled.z as u8]
}
