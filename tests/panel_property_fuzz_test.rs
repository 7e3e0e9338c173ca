use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{FileFailurePersistence, TestCaseResult};
use widget_panel::{
    Page, SUM_LABEL, THEME_GRADIENT, coerce_number, install_panel, js_number_string,
};

const PANEL_PROPTEST_REGRESSION_FILE: &str =
    "tests/proptest-regressions/panel_property_fuzz_test.txt";
const DEFAULT_PANEL_PROPTEST_CASES: u32 = 128;

const PANEL_HTML: &str = r#"
<body>
  <span id='count'>0</span>
  <button id='incr'>+1</button>
  <button id='decr'>-1</button>
  <button id='themeBtn'>theme</button>
  <input id='colorInput'>
  <button id='applyColor'>apply</button>
  <button id='showDate'>today</button>
  <p id='dateOutput'></p>
  <input id='a'>
  <input id='b'>
  <button id='sumBtn'>sum</button>
  <p id='sumOutput'></p>
</body>
"#;

fn panel_proptest_cases() -> u32 {
    std::env::var("WIDGET_PANEL_PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_PANEL_PROPTEST_CASES)
}

#[derive(Clone, Debug)]
enum PanelAction {
    Increment,
    Decrement,
    ToggleTheme,
    ShowDate,
}

fn panel_action_strategy() -> BoxedStrategy<PanelAction> {
    prop_oneof![
        3 => Just(PanelAction::Increment),
        3 => Just(PanelAction::Decrement),
        2 => Just(PanelAction::ToggleTheme),
        1 => Just(PanelAction::ShowDate),
    ]
    .boxed()
}

fn number_input_strategy() -> BoxedStrategy<String> {
    vec(
        prop_oneof![
            Just('0'),
            Just('1'),
            Just('2'),
            Just('5'),
            Just('9'),
            Just('.'),
            Just('-'),
            Just(' '),
            Just('e'),
            Just('x'),
        ],
        0..=8,
    )
    .prop_map(|chars| chars.into_iter().collect())
    .boxed()
}

fn fresh_panel() -> std::result::Result<Page, proptest::test_runner::TestCaseError> {
    let mut page = Page::from_html(PANEL_HTML)
        .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;
    install_panel(&mut page)
        .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;
    Ok(page)
}

fn assert_panel_sequence_holds(actions: &[PanelAction]) -> TestCaseResult {
    let mut page = fresh_panel()?;

    let mut increments: i64 = 0;
    let mut decrements: i64 = 0;
    let mut toggles: i64 = 0;

    for (step, action) in actions.iter().enumerate() {
        let outcome = match action {
            PanelAction::Increment => {
                increments += 1;
                page.click("#incr")
            }
            PanelAction::Decrement => {
                decrements += 1;
                page.click("#decr")
            }
            PanelAction::ToggleTheme => {
                toggles += 1;
                page.click("#themeBtn")
            }
            PanelAction::ShowDate => page.click("#showDate"),
        };
        prop_assert!(
            outcome.is_ok(),
            "action failed at step {step}: {action:?}, error={outcome:?}"
        );
    }

    // Counter display equals N - M whenever at least one counter click ran;
    // before the first click the markup's initial text stands.
    if increments + decrements > 0 {
        let expected = (increments - decrements).to_string();
        let actual = page
            .text("#count")
            .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;
        prop_assert_eq!(actual, expected, "after actions: {:?}", actions);
    }

    // Theme background parity: gradient iff the toggle ran an odd number of
    // times (no applyColor in this sequence, so nothing else writes it).
    let background = page
        .body_style("background")
        .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;
    let expected_background = if toggles % 2 == 1 { THEME_GRADIENT } else { "" };
    prop_assert_eq!(background, expected_background, "after actions: {:?}", actions);

    Ok(())
}

fn assert_sum_matches_coercion(a: &str, b: &str) -> TestCaseResult {
    let mut page = fresh_panel()?;

    let mut run = || -> widget_panel::Result<String> {
        page.type_text("#a", a)?;
        page.type_text("#b", b)?;
        page.click("#sumBtn")?;
        page.text("#sumOutput")
    };
    let actual = run().map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;

    let expected = format!(
        "{SUM_LABEL}{}",
        js_number_string(coerce_number(a) + coerce_number(b))
    );
    prop_assert_eq!(actual, expected, "inputs: a={:?}, b={:?}", a, b);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: panel_proptest_cases(),
        failure_persistence: Some(Box::new(
            FileFailurePersistence::Direct(PANEL_PROPTEST_REGRESSION_FILE),
        )),
        .. ProptestConfig::default()
    })]

    #[test]
    fn panel_click_sequences_keep_counter_and_theme_invariants(
        actions in vec(panel_action_strategy(), 1..=32),
    ) {
        assert_panel_sequence_holds(&actions)?;
    }

    #[test]
    fn sum_widget_always_matches_reference_coercion(
        a in number_input_strategy(),
        b in number_input_strategy(),
    ) {
        assert_sum_matches_coercion(&a, &b)?;
    }
}
