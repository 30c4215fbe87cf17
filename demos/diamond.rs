use anyhow::Result;

use flowgraph::{ExecutionMode, Session, SessionConfig, Tensor, TensorView, TensorViewMut};

/// Diamond graph: the source fans out to two scalers whose results are
/// summed by the sink.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let session = Session::new(
        "diamond",
        SessionConfig {
            mode: ExecutionMode::Parallel,
            num_thread: 4,
        },
    );

    let broadcast = |inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]| -> flowgraph::Result<()> {
        for output in outputs.iter_mut() {
            output.as_f32_mut()?.copy_from_slice(inputs[0].as_f32()?);
        }
        Ok(())
    };
    let scale = |factor: f32| {
        move |inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]| -> flowgraph::Result<()> {
            for (out, x) in outputs[0].as_f32_mut()?.iter_mut().zip(inputs[0].as_f32()?) {
                *out = x * factor;
            }
            Ok(())
        }
    };
    let sum = |inputs: &[TensorView<'_>], outputs: &mut [TensorViewMut<'_>]| -> flowgraph::Result<()> {
        let a = inputs[0].as_f32()?;
        let b = inputs[1].as_f32()?;
        for ((out, x), y) in outputs[0].as_f32_mut()?.iter_mut().zip(a).zip(b) {
            *out = x + y;
        }
        Ok(())
    };

    session.create_node("source", broadcast, vec![vec![1]], vec![vec![1], vec![1]], 0)?;
    session.create_node("left", scale(2.0), vec![vec![1]], vec![vec![1]], 1)?;
    session.create_node("right", scale(3.0), vec![vec![1]], vec![vec![1]], 2)?;
    session.create_node("sink", sum, vec![vec![1], vec![1]], vec![vec![1]], 3)?;
    session.build_graph(&[
        ("source", "left"),
        ("source", "right"),
        ("left", "sink"),
        ("right", "sink"),
    ])?;
    session.start()?;

    for value in [1.0f32, 2.0, 5.0] {
        let fed = Tensor::from_f32(&[1], &[value])?;
        session.feed(&fed.view())?;

        let mut out = Tensor::new(&[1])?;
        session.get_result(&mut out.view_mut())?;
        println!("{} -> {}", value, out.view().as_f32()?[0]);
    }

    session.stop()?;
    Ok(())
}
