use crate::error::Result;
use crate::tensor::{TensorView, TensorViewMut};

/// The payload contract of a normal node.
///
/// A task receives one view per input edge and one mutable view per output
/// edge, in the positional order declared at node creation. It must write
/// every output exactly once and must not retain views past return. The
/// task may block or enqueue device work; the scheduler treats it as
/// opaque. Thread affinity across invocations is only guaranteed when the
/// task's node is alone in its group.
pub trait Task: Send + Sync {
    fn compute(&self, inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]) -> Result<()>;
}

impl<F> Task for F
where
    F: Fn(&[TensorView<'_>], &mut [TensorViewMut<'_>]) -> Result<()> + Send + Sync,
{
    fn compute(&self, inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]) -> Result<()> {
        self(inputs, outputs)
    }
}
