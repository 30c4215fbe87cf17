use anyhow::Result;

use flowgraph::{ExecutionMode, Session, SessionConfig, Tensor, TensorView, TensorViewMut};

/// Three-stage linear pipeline: feed a vector, add one, double it.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let session = Session::new(
        "pipeline",
        SessionConfig {
            mode: ExecutionMode::Parallel,
            num_thread: 3,
        },
    );

    let identity = |inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]| -> flowgraph::Result<()> {
        outputs[0].as_f32_mut()?.copy_from_slice(inputs[0].as_f32()?);
        Ok(())
    };
    let increment = |inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]| -> flowgraph::Result<()> {
        for (out, x) in outputs[0].as_f32_mut()?.iter_mut().zip(inputs[0].as_f32()?) {
            *out = x + 1.0;
        }
        Ok(())
    };
    let double = |inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]| -> flowgraph::Result<()> {
        for (out, x) in outputs[0].as_f32_mut()?.iter_mut().zip(inputs[0].as_f32()?) {
            *out = x * 2.0;
        }
        Ok(())
    };

    session.create_node("source", identity, vec![vec![4]], vec![vec![4]], 0)?;
    session.create_node("increment", increment, vec![vec![4]], vec![vec![4]], 1)?;
    session.create_node("double", double, vec![vec![4]], vec![vec![4]], 2)?;
    session.build_graph(&[("source", "increment"), ("increment", "double")])?;
    session.show_info();
    session.start()?;

    for round in 0..4 {
        let fed = Tensor::from_f32(&[4], &[round as f32; 4])?;
        session.feed(&fed.view())?;

        let mut out = Tensor::new(&[4])?;
        session.get_result(&mut out.view_mut())?;
        println!("round {}: {:?}", round, out.view().as_f32()?);
    }

    session.stop()?;
    Ok(())
}
