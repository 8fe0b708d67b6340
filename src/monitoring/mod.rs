/*!
 * Monitoring
 * Structured logging and step timing
 */

mod tracer;

pub use tracer::{init_tracing, span_step, StepSpan};
