//! Property tests for placeholder substitution.

use proptest::prelude::*;
use regex::Regex;
use sendflow::queue::template::render;
use sendflow::queue::{Company, SendStatus, SenderIdentity, TemplateVars};
use uuid::Uuid;

const KEYS: [&str; 12] = [
    "company_name",
    "contact_name",
    "contact_title",
    "bm_summary",
    "news_summary",
    "sender_name",
    "sender_email",
    "custom_intro",
    "custom_proposal",
    "demo_link",
    "sender_signature",
    "unknown_key",
];

/// Template text: literal runs, stray braces and placeholders mixed together.
fn template_strategy() -> impl Strategy<Value = String> {
    let piece = prop_oneof![
        "[a-zA-Z0-9 ,.\n가-힣]{0,12}",
        Just("{".to_string()),
        Just("}".to_string()),
        prop::sample::select(KEYS.to_vec()).prop_map(|k| format!("{{{{{k}}}}}")),
        prop::sample::select(KEYS.to_vec()).prop_map(|k| format!("{{{{ {k} }}}}")),
    ];
    prop::collection::vec(piece, 0..16).prop_map(|parts| parts.concat())
}

/// Field values, braces included.
fn value_strategy() -> impl Strategy<Value = String> {
    "[a-z{} ]{0,16}"
}

fn company(name: String, contact: String, summary: String) -> Company {
    Company {
        id: Uuid::new_v4(),
        name,
        contact_name: Some(contact),
        contact_title: None,
        contact_email: Some("x@y.test".into()),
        bm_summary: Some(summary),
        news_summary: None,
        send_status: SendStatus::NotSent,
        send_count: 0,
        last_send_date: None,
    }
}

fn placeholder() -> Regex {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap()
}

proptest! {
    #[test]
    fn rendered_text_has_no_placeholders_left(
        text in template_strategy(),
        name in value_strategy(),
        contact in value_strategy(),
        summary in value_strategy(),
        signature in value_strategy(),
    ) {
        let sender = SenderIdentity { name: "Kim".into(), email: "kim@x.test".into() };
        let vars = TemplateVars::for_company(&company(name, contact, summary), &sender, &signature);

        let once = render(&text, &vars);
        prop_assert!(!placeholder().is_match(&once), "left a placeholder in {:?}", once);
        prop_assert_eq!(render(&once, &vars), once);
    }

    #[test]
    fn text_without_placeholders_is_untouched(text in "[a-zA-Z0-9 {}\n]{0,40}") {
        prop_assume!(!placeholder().is_match(&text));
        prop_assert_eq!(render(&text, &TemplateVars::default()), text);
    }

    #[test]
    fn single_braces_in_company_data_are_kept(
        before in "[a-z ]{0,6}",
        inner in "[a-z]{1,6}",
        after in "[a-z ]{0,6}",
    ) {
        let name = format!("{before}{{{inner}}}{after}");
        let sender = SenderIdentity { name: "Kim".into(), email: "kim@x.test".into() };
        let vars = TemplateVars::for_company(&company(name.clone(), "Lee".into(), String::new()), &sender, "");
        prop_assert_eq!(render("Hi {{company_name}}.", &vars), format!("Hi {name}."));
    }
}
