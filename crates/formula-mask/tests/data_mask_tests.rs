use formula_mask::{
    BinaryOp, Bindings, DataMask, DataShape, Dataset, EvalError, Expr, InMemoryDataset, Interpreter,
    MaskError, MaskOptions, Scope, SlicingIndex, Value, Variables,
};
use pretty_assertions::assert_eq;
use std::rc::Rc;

fn sales() -> Rc<dyn Dataset> {
    Rc::new(
        InMemoryDataset::from_columns([
            (
                "region",
                ["East", "West", "East", "North", "West", "East", "North", "West"]
                    .into_iter()
                    .map(Value::from)
                    .collect::<Vec<_>>(),
            ),
            (
                "amount",
                [10, 20, 30, 40, 50, 60, 70, 80]
                    .into_iter()
                    .map(Value::from)
                    .collect::<Vec<_>>(),
            ),
        ])
        .unwrap(),
    )
}

fn grouped_mask(parent: &Scope) -> DataMask<Interpreter> {
    let data = sales();
    let variables = Variables::all(data.as_ref());
    DataMask::new(data, variables, DataShape::Grouped, parent, Interpreter::new()).unwrap()
}

fn numbers(values: &[i32]) -> Value {
    Value::from(values.iter().copied().map(Value::from).collect::<Vec<_>>())
}

fn sum(name: &str) -> Expr {
    Expr::call("sum", vec![Expr::symbol(name)])
}

#[test]
fn columns_resolve_to_the_rows_of_the_current_group_only() {
    let mask = grouped_mask(&Scope::root());
    let east = SlicingIndex::grouped(0, vec![0, 2, 5]);
    let west = SlicingIndex::grouped(1, vec![1, 4, 7]);

    let east_amount = mask.evaluate(&Expr::symbol("amount"), &east).unwrap();
    let west_amount = mask.evaluate(&Expr::symbol("amount"), &west).unwrap();

    assert_eq!(east_amount, numbers(&[10, 30, 60]));
    assert_eq!(west_amount, numbers(&[20, 50, 80]));
    assert!(!east_amount.shares_storage(&west_amount));

    assert_eq!(mask.evaluate(&sum("amount"), &east).unwrap(), Value::from(100));
    assert_eq!(mask.evaluate(&sum("amount"), &west).unwrap(), Value::from(150));
}

#[test]
fn repeated_references_within_a_group_materialize_once() {
    let mask = grouped_mask(&Scope::root());
    let idx = SlicingIndex::grouped(0, vec![0, 2, 5]);

    let expr = Expr::binary(
        BinaryOp::Divide,
        sum("amount"),
        Expr::call("length", vec![Expr::symbol("amount")]),
    );
    assert_eq!(
        mask.evaluate(&expr, &idx).unwrap(),
        Value::from(100.0 / 3.0)
    );
    assert_eq!(mask.stats().materialized, 1);

    let first = mask.resolve("amount").unwrap();
    let second = mask.resolve("amount").unwrap();
    assert_eq!(first, second);
    assert!(first.shares_storage(&second));
    assert_eq!(mask.stats().materialized, 1);
    assert_eq!(mask.stats().hits, 2);
}

#[test]
fn a_new_group_forces_rematerialization() {
    let mask = grouped_mask(&Scope::root());
    let idx = SlicingIndex::grouped(0, vec![0, 2, 5]);

    mask.evaluate(&sum("amount"), &idx).unwrap();
    mask.evaluate(&sum("amount"), &idx).unwrap();
    assert_eq!(mask.stats().materialized, 2);

    mask.evaluate(&sum("amount"), &SlicingIndex::grouped(1, vec![1]))
        .unwrap();
    assert_eq!(mask.stats().materialized, 3);
}

#[test]
fn update_clears_before_installing_and_does_not_materialize() {
    let mask = grouped_mask(&Scope::root());
    mask.evaluate(&sum("amount"), &SlicingIndex::grouped(0, vec![0, 2]))
        .unwrap();
    assert!(mask.bindings().bottom().contains_local("amount"));
    assert_eq!(mask.stats().materialized, 1);

    mask.bindings().update(&SlicingIndex::grouped(1, vec![3, 6]));
    // The old subset is gone and nothing was gathered for the new group yet.
    assert!(!mask.bindings().bottom().contains_local("amount"));
    assert_eq!(mask.stats().materialized, 1);

    assert_eq!(mask.resolve("amount").unwrap(), numbers(&[40, 70]));
    assert_eq!(mask.stats().materialized, 2);
}

#[test]
fn group_metadata_is_written_per_evaluation() {
    let mask = grouped_mask(&Scope::root());
    let idx = SlicingIndex::grouped(4, vec![2, 5, 7]);

    assert_eq!(
        mask.evaluate(&Expr::call("n", vec![]), &idx).unwrap(),
        Value::from(3)
    );
    assert_eq!(
        mask.evaluate(&Expr::call("cur_group_id", vec![]), &idx)
            .unwrap(),
        Value::from(5)
    );
    assert_eq!(
        mask.evaluate(&Expr::symbol("..group_size"), &SlicingIndex::grouped(0, vec![1]))
            .unwrap(),
        Value::from(1)
    );
}

#[test]
fn undeclared_names_fail_for_every_binding_variant() {
    let data = sales();
    let variables = Variables::new(data.as_ref(), ["amount"]).unwrap();

    for shape in [DataShape::Grouped, DataShape::Rowwise, DataShape::Ungrouped] {
        let mask = DataMask::new(
            data.clone(),
            variables.clone(),
            shape,
            &Scope::root(),
            Interpreter::new(),
        )
        .unwrap();

        assert_eq!(
            mask.resolve("region"),
            Err(MaskError::UndeclaredVariable("region".into())),
            "{shape:?} before any group"
        );
        mask.evaluate(&Expr::Null, &SlicingIndex::natural(data.row_count()))
            .unwrap();
        assert_eq!(
            mask.resolve("region"),
            Err(MaskError::UndeclaredVariable("region".into())),
            "{shape:?}"
        );
        assert_eq!(
            mask.evaluate(&Expr::symbol("region"), &SlicingIndex::natural(8)),
            Err(EvalError::UndefinedVariable("region".into()))
        );
    }
}

#[test]
fn fast_path_matches_general_path_for_a_single_group() {
    let data = sales();
    let parent = Scope::root();
    let general = DataMask::new(
        data.clone(),
        Variables::all(data.as_ref()),
        DataShape::Grouped,
        &parent,
        Interpreter::new(),
    )
    .unwrap();
    let fast = DataMask::new(
        data.clone(),
        Variables::all(data.as_ref()),
        DataShape::Ungrouped,
        &parent,
        Interpreter::new(),
    )
    .unwrap();

    let all_rows = SlicingIndex::grouped(0, (0..data.row_count()).collect::<Vec<_>>());
    let natural = SlicingIndex::natural(data.row_count());

    let exprs = [
        Expr::symbol("amount"),
        sum("amount"),
        Expr::call("n_distinct", vec![Expr::symbol("region")]),
        Expr::call("n", vec![]),
        Expr::call("cur_group_id", vec![]),
        Expr::data("region"),
        Expr::binary(
            BinaryOp::Greater,
            Expr::symbol("amount"),
            Expr::call("mean", vec![Expr::symbol("amount")]),
        ),
    ];
    for expr in &exprs {
        assert_eq!(
            general.evaluate(expr, &all_rows).unwrap(),
            fast.evaluate(expr, &natural).unwrap(),
            "{expr:?}"
        );
    }

    assert_eq!(general.variables().names(), fast.variables().names());
    assert!(fast.bindings().bottom().ptr_eq(fast.bindings().top()));
    assert!(fast.proxy().is_none());
    assert_eq!(fast.stats().materialized, 0);
}

#[test]
fn rowwise_groups_are_single_rows() {
    let data = sales();
    let mask = DataMask::new(
        data.clone(),
        Variables::all(data.as_ref()),
        DataShape::Rowwise,
        &Scope::root(),
        Interpreter::new(),
    )
    .unwrap();

    let row = SlicingIndex::rowwise(3);
    assert_eq!(
        mask.evaluate(&Expr::symbol("region"), &row).unwrap(),
        Value::from(vec![Value::from("North")])
    );
    assert_eq!(mask.evaluate(&Expr::call("n", vec![]), &row).unwrap(), Value::from(1));
    assert_eq!(
        mask.evaluate(&Expr::call("cur_group_id", vec![]), &row)
            .unwrap(),
        Value::from(4)
    );
}

#[test]
fn pronouns_reach_columns_and_the_caller_environment() {
    let parent = Scope::root();
    parent.define("amount", Value::from(999));
    parent.define("threshold", Value::from(25));
    let mask = grouped_mask(&parent);
    let idx = SlicingIndex::grouped(0, vec![0, 2]);

    // Columns shadow the caller's bindings; `.env` reaches past them.
    assert_eq!(mask.evaluate(&Expr::symbol("amount"), &idx).unwrap(), numbers(&[10, 30]));
    assert_eq!(
        mask.evaluate(
            &Expr::Pronoun {
                pronoun: ".env".into(),
                name: "amount".into(),
            },
            &idx
        )
        .unwrap(),
        Value::from(999)
    );
    assert_eq!(mask.evaluate(&Expr::data("amount"), &idx).unwrap(), numbers(&[10, 30]));
    assert_eq!(
        mask.evaluate(&Expr::symbol("threshold"), &idx).unwrap(),
        Value::from(25)
    );

    assert_eq!(
        mask.evaluate(&Expr::data("threshold"), &idx),
        Err(EvalError::PronounLookup {
            pronoun: ".data".into(),
            name: "threshold".into(),
        })
    );
}

#[test]
fn evaluation_scope_state_persists_across_groups_until_cleared() {
    let mask = grouped_mask(&Scope::root());

    mask.evaluate(
        &Expr::assign("offset", Expr::Number(100.0)),
        &SlicingIndex::grouped(0, vec![0]),
    )
    .unwrap();
    let expr = Expr::binary(BinaryOp::Add, Expr::symbol("offset"), Expr::call("n", vec![]));
    assert_eq!(
        mask.evaluate(&expr, &SlicingIndex::grouped(1, vec![1, 4]))
            .unwrap(),
        Value::from(102)
    );

    mask.clear_scope();
    assert_eq!(
        mask.evaluate(&expr, &SlicingIndex::grouped(1, vec![1, 4])),
        Err(EvalError::UndefinedVariable("offset".into()))
    );
    assert_eq!(
        mask.scope().local_names(),
        vec!["..group_number", "..group_size", ".data", ".env"]
    );
}

#[test]
fn evaluator_errors_propagate_unchanged_and_leave_the_mask_usable() {
    let mask = grouped_mask(&Scope::root());
    let idx = SlicingIndex::grouped(0, vec![0, 2]);

    assert_eq!(
        mask.evaluate(&Expr::call("no_such_fn", vec![Expr::symbol("amount")]), &idx),
        Err(EvalError::UnknownFunction("no_such_fn".into()))
    );
    assert_eq!(
        mask.evaluate(&sum("amount"), &SlicingIndex::grouped(1, vec![1]))
            .unwrap(),
        Value::from(20)
    );
}

#[test]
fn nested_evaluation_within_a_group_reads_the_installed_index() {
    let mask = grouped_mask(&Scope::root());
    let expr = Expr::Block(vec![
        Expr::assign("total", Expr::function(vec![], sum("amount"))),
        Expr::binary(
            BinaryOp::Add,
            Expr::call("total", vec![]),
            Expr::call("total", vec![]),
        ),
    ]);

    assert_eq!(
        mask.evaluate(&expr, &SlicingIndex::grouped(0, vec![0, 2]))
            .unwrap(),
        Value::from(80)
    );
    assert_eq!(
        mask.evaluate(&Expr::call("total", vec![]), &SlicingIndex::grouped(1, vec![7]))
            .unwrap(),
        Value::from(80)
    );
    assert_eq!(mask.stats().materialized, 2);
}

#[test]
fn options_rename_metadata_and_pronouns() {
    let data = sales();
    let options = MaskOptions {
        data_pronoun: ".cols".into(),
        expose_env_pronoun: false,
        group_size_var: ".n".into(),
        ..MaskOptions::default()
    };
    let mask = DataMask::with_options(
        data.clone(),
        Variables::all(data.as_ref()),
        DataShape::Grouped,
        &Scope::root(),
        Interpreter::for_options(&options),
        options,
    )
    .unwrap();
    let idx = SlicingIndex::grouped(2, vec![3, 6]);

    assert_eq!(mask.evaluate(&Expr::call("n", vec![]), &idx).unwrap(), Value::from(2));
    assert_eq!(
        mask.evaluate(
            &Expr::Pronoun {
                pronoun: ".cols".into(),
                name: "amount".into(),
            },
            &idx
        )
        .unwrap(),
        numbers(&[40, 70])
    );
    assert!(!mask.scope().contains_local(".env"));
    assert!(!mask.scope().contains_local(".data"));

    assert_eq!(mask.options().group_size_var, ".n");
    assert_eq!(
        mask.evaluator()
            .eval_expr(&Expr::call("cur_group_id", vec![]), mask.scope())
            .unwrap(),
        Value::from(3)
    );
}

#[test]
fn dropping_the_mask_releases_closures_stored_in_its_scope() {
    let parent = Scope::root();
    let sentinel: Rc<[Value]> = Rc::from(vec![Value::from(1)]);
    parent.define("sentinel", Value::Vector(Rc::clone(&sentinel)));

    let mask = grouped_mask(&parent);
    mask.evaluate(
        &Expr::assign("total", Expr::function(vec![], sum("amount"))),
        &SlicingIndex::grouped(0, vec![0, 2]),
    )
    .unwrap();
    mask.evaluate(
        &Expr::assign(
            "make",
            Expr::function(vec![], Expr::function(vec![], sum("amount"))),
        ),
        &SlicingIndex::grouped(1, vec![1]),
    )
    .unwrap();

    drop(mask);
    drop(parent);
    assert_eq!(Rc::strong_count(&sentinel), 1);
}

#[test]
fn engine_values_in_the_resolved_scope_are_not_replaced_by_columns() {
    let mask = grouped_mask(&Scope::root());
    mask.bindings().update(&SlicingIndex::grouped(0, vec![0, 1]));
    mask.bindings().bottom().define("amount", Value::from("engine"));

    assert_eq!(mask.resolve("amount").unwrap(), numbers(&[10, 20]));
    assert_eq!(
        mask.evaluate(&Expr::symbol("amount"), &SlicingIndex::grouped(1, vec![2]))
            .unwrap(),
        Value::from("engine")
    );
    assert_eq!(
        mask.bindings().bottom().get_local("amount").unwrap(),
        Some(Value::from("engine"))
    );
}

#[test]
fn calling_a_builtin_does_not_force_a_column_of_the_same_name() {
    let data: Rc<dyn Dataset> = Rc::new(
        InMemoryDataset::from_columns([
            ("n", vec![Value::from(7), Value::from(8), Value::from(9)]),
            ("sum", vec![Value::from(1), Value::from(2), Value::from(3)]),
        ])
        .unwrap(),
    );
    let variables = Variables::all(data.as_ref());
    let mask = DataMask::new(
        data,
        variables,
        DataShape::Grouped,
        &Scope::root(),
        Interpreter::new(),
    )
    .unwrap();
    let idx = SlicingIndex::grouped(0, vec![0, 2]);

    assert_eq!(mask.evaluate(&Expr::call("n", vec![]), &idx).unwrap(), Value::from(2));
    assert_eq!(mask.stats().materialized, 0);

    assert_eq!(
        mask.evaluate(&Expr::call("sum", vec![Expr::symbol("n")]), &idx)
            .unwrap(),
        Value::from(16)
    );
    assert_eq!(mask.stats().materialized, 1);
}
