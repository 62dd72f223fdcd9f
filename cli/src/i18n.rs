//! CLI message catalog
//!
//! Operator-facing strings live in `locales/en/main.ftl` and are resolved
//! through a fluent bundle built on first use.

use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource};
use std::sync::OnceLock;
use unic_langid::LanguageIdentifier;

const EN_MESSAGES: &str = include_str!("../locales/en/main.ftl");

static BUNDLE: OnceLock<FluentBundle<FluentResource>> = OnceLock::new();

fn bundle() -> &'static FluentBundle<FluentResource> {
    BUNDLE.get_or_init(|| {
        let langid: LanguageIdentifier = "en-US".parse().expect("valid language identifier");
        let mut bundle = FluentBundle::new_concurrent(vec![langid]);
        let resource =
            FluentResource::try_new(EN_MESSAGES.to_string()).expect("valid FTL resource");
        bundle
            .add_resource(resource)
            .expect("no conflicting resources");
        bundle
    })
}

fn render(id: &str, args: Option<&FluentArgs>) -> String {
    let bundle = bundle();
    match bundle.get_message(id).and_then(|msg| msg.value()) {
        Some(pattern) => {
            let mut errors = vec![];
            bundle.format_pattern(pattern, args, &mut errors).to_string()
        }
        None => id.to_string(),
    }
}

/// Message for `id`, or `id` itself when the catalog lacks it
pub fn t(id: &str) -> String {
    render(id, None)
}

/// Message for `id` with named arguments
pub fn t_args(id: &str, args: &[(&str, &str)]) -> String {
    let mut fluent_args = FluentArgs::new();
    for (key, val) in args {
        fluent_args.set(*key, *val);
    }
    render(id, Some(&fluent_args))
}
