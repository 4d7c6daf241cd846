use crate::assembly::{check_element_count, GlobalAssembler, GlobalSystem};
use crate::element::{Element, ElementOptions, LocalSystem};
use crate::error::Error;
use crate::indexing::IndexTable;
use crossbeam::channel::bounded;
use log::debug;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// A three-stage pipeline: a generator emits element indices in order, a pool of workers
/// computes local systems in any order, and a single merge stage on the calling thread adds
/// them into the global system.
///
/// At most `depth` elements are between the generator and the merge stage at any time, which
/// bounds the memory held by computed but not yet merged local systems.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PipelineAssembler {
    num_workers: usize,
    depth: usize,
}

impl Default for PipelineAssembler {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_DEPTH)
    }
}

impl PipelineAssembler {
    pub const DEFAULT_DEPTH: usize = 8;

    /// `0` workers means one per available core. A depth of `0` is treated as `1`.
    pub fn new(num_workers: usize, depth: usize) -> Self {
        Self {
            num_workers,
            depth: depth.max(1),
        }
    }

    pub fn num_workers(&self) -> usize {
        if self.num_workers == 0 {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            self.num_workers
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl GlobalAssembler for PipelineAssembler {
    fn assemble(
        &self,
        elements: &[Arc<dyn Element>],
        index_table: &IndexTable,
        options: &ElementOptions,
        system: &mut GlobalSystem,
    ) -> Result<(), Error> {
        check_element_count(elements, index_table);
        let num_workers = self.num_workers();
        let depth = self.depth;
        debug!(
            "Pipeline assembly of {} elements with {} workers and depth {}",
            elements.len(),
            num_workers,
            depth
        );

        // Every element takes a token before it is emitted and returns it once merged
        let (token_sender, token_receiver) = bounded::<()>(depth);
        for _ in 0..depth {
            token_sender
                .send(())
                .expect("Internal error: Token channel has capacity for all tokens");
        }
        let (index_sender, index_receiver) = bounded::<usize>(depth);
        let (result_sender, result_receiver) = bounded::<(usize, ComputeOutcome)>(depth);

        let outcome = thread::scope(move |scope| {
            scope.spawn(move || {
                for index in 0..elements.len() {
                    if token_receiver.recv().is_err() || index_sender.send(index).is_err() {
                        break;
                    }
                }
            });

            for _ in 0..num_workers {
                let index_receiver = index_receiver.clone();
                let result_sender = result_sender.clone();
                scope.spawn(move || {
                    for index in index_receiver {
                        // A panicking element must still reach the merge stage, otherwise its
                        // token is never returned and the other stages wait forever
                        let result = panic::catch_unwind(AssertUnwindSafe(|| elements[index].compute(options)));
                        let stop = result.is_err();
                        if result_sender.send((index, result)).is_err() || stop {
                            break;
                        }
                    }
                });
            }
            drop(index_receiver);
            drop(result_sender);

            let mut accumulator = system.accumulator();
            let mut outcome = Ok(Ok(()));
            for (index, result) in &result_receiver {
                let merged = match result {
                    Ok(computed) => computed
                        .map_err(|report| Error::ElementFailure { element: index, report })
                        .and_then(|local| accumulator.add_element(index, index_table.element(index), &local)),
                    Err(payload) => {
                        outcome = Err(payload);
                        break;
                    }
                };
                if let Err(err) = merged {
                    outcome = Ok(Err(err));
                    break;
                }
                // Fails only once the generator has emitted the last element
                token_sender.send(()).ok();
            }

            // Hanging up makes the generator and the workers stop at their next send or receive
            drop(result_receiver);
            drop(token_sender);
            outcome
        });

        // Rethrown only after the scope has joined every stage
        outcome.unwrap_or_else(|payload| panic::resume_unwind(payload))
    }
}

/// The result of computing one element, or the payload of the panic it raised.
type ComputeOutcome = thread::Result<eyre::Result<LocalSystem>>;
