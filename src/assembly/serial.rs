use crate::assembly::{check_element_count, compute_element, GlobalAssembler, GlobalSystem};
use crate::element::{Element, ElementOptions};
use crate::error::Error;
use crate::indexing::IndexTable;
use std::sync::Arc;

/// Computes and adds elements one at a time, in list order.
///
/// For a fixed element order the result is bit-for-bit reproducible.
#[derive(Debug, Copy, Clone, Default)]
pub struct SerialAssembler;

impl GlobalAssembler for SerialAssembler {
    fn assemble(
        &self,
        elements: &[Arc<dyn Element>],
        index_table: &IndexTable,
        options: &ElementOptions,
        system: &mut GlobalSystem,
    ) -> Result<(), Error> {
        check_element_count(elements, index_table);
        let mut accumulator = system.accumulator();
        for (index, element) in elements.iter().enumerate() {
            let local = compute_element(index, element.as_ref(), options)?;
            accumulator.add_element(index, index_table.element(index), &local)?;
        }
        Ok(())
    }
}
