//! Progress reporting for the solve loop.
use log::info;

/// Receives the residual norm of every iteration of the solve loop.
pub trait ProgressReporter {
    fn report(&mut self, iteration: usize, residual_norm: f64);
}

/// Reports progress through the `log` facade at `info` level.
#[derive(Debug, Copy, Clone, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&mut self, iteration: usize, residual_norm: f64) {
        info!("{:>4} {:e}", iteration, residual_norm);
    }
}

/// Discards all progress.
#[derive(Debug, Copy, Clone, Default)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn report(&mut self, _iteration: usize, _residual_norm: f64) {}
}

impl<F> ProgressReporter for F
where
    F: FnMut(usize, f64),
{
    fn report(&mut self, iteration: usize, residual_norm: f64) {
        self(iteration, residual_norm)
    }
}
