use formula_core::{Evaluation, Formula, FormulaContext, FormulaError, Transition, Update};
use formula_testing::{init_test_logging, FormulaTestObserver, ManualStream};

/// Counts messages from a stream that is only subscribed while `listening` is set.
struct CounterFormula {
    increments: ManualStream<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct CounterModel {
    count: i32,
}

impl Formula for CounterFormula {
    type Input = bool;
    type State = i32;
    type Effect = i32;
    type RenderModel = CounterModel;

    fn initial_state(&self, _input: &bool) -> i32 {
        0
    }

    fn evaluate(
        &self,
        listening: &bool,
        state: &i32,
        context: &mut FormulaContext<'_, i32, i32>,
    ) -> Evaluation<CounterModel> {
        let mut evaluation = Evaluation::new(CounterModel { count: *state });
        if *listening {
            let update = context.events("increments", self.increments.clone(), |count, step| {
                let count = count + step;
                if count % 10 == 0 {
                    Transition::to(count).with_effect(count)
                } else {
                    Transition::to(count)
                }
            });
            evaluation = evaluation.with_update(update);
        }
        evaluation
    }
}

#[test]
fn synchronous_burst_on_start_emits_a_single_render_model() {
    init_test_logging();
    let increments = ManualStream::with_burst(vec![1, 1, 1]);
    let observer = FormulaTestObserver::start(
        CounterFormula {
            increments: increments.clone(),
        },
        true,
    )
    .expect("start");

    observer.assert_values(&[CounterModel { count: 3 }]);
    observer.assert_effects(&[]);
    assert_eq!(increments.starts(), 1);
    assert_eq!(increments.active(), 1);
}

#[test]
fn each_message_produces_one_render_model() {
    init_test_logging();
    let increments = ManualStream::new();
    let observer = FormulaTestObserver::start(
        CounterFormula {
            increments: increments.clone(),
        },
        true,
    )
    .expect("start");

    increments.emit(4).expect("emit");
    increments.emit(6).expect("emit");

    observer.assert_values(&[
        CounterModel { count: 0 },
        CounterModel { count: 4 },
        CounterModel { count: 10 },
    ]);
    observer.assert_effects(&[10]);
}

#[test]
fn messages_that_do_not_change_the_render_model_are_not_emitted() {
    init_test_logging();
    let increments = ManualStream::new();
    let observer = FormulaTestObserver::start(
        CounterFormula {
            increments: increments.clone(),
        },
        true,
    )
    .expect("start");

    increments.emit(0).expect("emit");
    increments.emit(0).expect("emit");

    observer.assert_values(&[CounterModel { count: 0 }]);
}

#[test]
fn inactive_formula_never_subscribes() {
    init_test_logging();
    let increments = ManualStream::new();
    let _observer = FormulaTestObserver::start(
        CounterFormula {
            increments: increments.clone(),
        },
        false,
    )
    .expect("start");

    assert_eq!(increments.starts(), 0);
    increments.emit(1).expect("no subscribers");
}

#[test]
fn cancel_stops_the_stream_and_rejects_late_messages() {
    init_test_logging();
    let increments = ManualStream::new();
    let mut observer = FormulaTestObserver::start(
        CounterFormula {
            increments: increments.clone(),
        },
        true,
    )
    .expect("start");
    let late = increments.clone();

    observer.cancel();
    observer.cancel();

    assert_eq!(increments.cancels(), 1);
    assert_eq!(increments.active(), 0);
    // Cancelled subscribers are gone, so nothing reaches the runtime.
    late.emit(1).expect("no subscribers left");
    observer.assert_values(&[CounterModel { count: 0 }]);
}

#[test]
fn messages_from_another_thread_are_rejected() {
    init_test_logging();

    struct Remote;

    impl formula_core::Stream for Remote {
        type Message = i32;

        fn start(
            &self,
            emitter: formula_core::EventCallback<i32>,
        ) -> Result<formula_core::Cancelable, formula_core::StreamError> {
            let result = std::thread::spawn(move || emitter.invoke(1))
                .join()
                .map_err(|_| "emitter thread panicked")?;
            match result {
                Err(FormulaError::ThreadAffinity { .. }) => Ok(formula_core::Cancelable::none()),
                Err(err) => Err(err.into()),
                Ok(()) => Err("emission from another thread was accepted".into()),
            }
        }
    }

    struct Listening;

    impl Formula for Listening {
        type Input = ();
        type State = i32;
        type Effect = ();
        type RenderModel = i32;

        fn initial_state(&self, _input: &()) -> i32 {
            0
        }

        fn evaluate(
            &self,
            _input: &(),
            state: &i32,
            context: &mut FormulaContext<'_, i32, ()>,
        ) -> Evaluation<i32> {
            let update: Update =
                context.events(&(), Remote, |count, step| Transition::to(count + step));
            Evaluation::new(*state).with_update(update)
        }
    }

    let observer = FormulaTestObserver::start(Listening, ()).expect("start");
    observer.assert_values(&[0]);
}
