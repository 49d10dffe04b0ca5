use formula_core::{Callback, Evaluation, Formula, FormulaContext, Transition};
use formula_testing::{init_test_logging, FormulaTestObserver, ManualStream};

#[derive(Clone, Debug, PartialEq)]
struct Model {
    label: String,
    rename: Callback,
}

struct Greeter {
    names: ManualStream<String>,
}

impl Formula for Greeter {
    type Input = String;
    type State = String;
    type Effect = String;
    type RenderModel = Model;

    fn initial_state(&self, input: &String) -> String {
        input.clone()
    }

    fn evaluate(
        &self,
        _input: &String,
        state: &String,
        context: &mut FormulaContext<'_, String, String>,
    ) -> Evaluation<Model> {
        let rename = context
            .callback(|name| Transition::to(format!("{name}!")).with_effect(name.clone()));
        let names = context.events("names", self.names.clone(), |_, name| Transition::to(name));
        Evaluation::new(Model {
            label: format!("hello {state}"),
            rename,
        })
        .with_update(names)
    }
}

#[test]
fn observer_records_values_and_effects_in_order() {
    init_test_logging();
    let names = ManualStream::new();
    let observer = FormulaTestObserver::start(
        Greeter {
            names: names.clone(),
        },
        "ann".to_string(),
    )
    .expect("start");

    names.emit("bob".to_string()).expect("emit");
    observer.output(|model| model.rename.clone()).invoke().expect("rename");

    let labels: Vec<String> = observer.values().into_iter().map(|model| model.label).collect();
    assert_eq!(labels, vec!["hello ann", "hello bob", "hello bob!"]);
    assert_eq!(observer.effects(), vec!["bob".to_string()]);
    assert_eq!(observer.last_value().label, "hello bob!");
}

#[test]
fn manual_stream_tracks_subscriptions() {
    init_test_logging();
    let names = ManualStream::<String>::with_burst(vec!["cy".to_string()]);
    let mut observer = FormulaTestObserver::start(
        Greeter {
            names: names.clone(),
        },
        "ann".to_string(),
    )
    .expect("start");

    assert_eq!(observer.last_value().label, "hello cy");
    assert_eq!((names.starts(), names.active()), (1, 1));

    observer.cancel();
    assert_eq!((names.cancels(), names.active()), (1, 0));
    assert!(observer.is_terminated());
    assert!(observer.runtime().is_none());
}
