//! `{{placeholder}}` substitution for direct (draft-less) enqueue.

use crate::queue::model::Company;
use regex::{Captures, Regex};
use std::sync::OnceLock;

const DEFAULT_CONTACT_NAME: &str = "담당자";

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid placeholder regex"))
}

#[derive(Debug, Clone, Default)]
pub struct SenderIdentity {
    pub name: String,
    pub email: String,
}

impl SenderIdentity {
    /// Signature used when no default signature row exists.
    pub fn fallback_signature(&self) -> String {
        format!("{}\nEmail: {}", self.name, self.email)
    }
}

/// Values for the recognised placeholders. Anything else renders as "".
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub company_name: String,
    pub contact_name: String,
    pub contact_title: String,
    pub bm_summary: String,
    pub news_summary: String,
    pub sender_name: String,
    pub sender_email: String,
    pub custom_intro: String,
    pub custom_proposal: String,
    pub demo_link: String,
    pub sender_signature: String,
}

impl TemplateVars {
    pub fn for_company(company: &Company, sender: &SenderIdentity, signature: &str) -> Self {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();

        let contact_name = company
            .contact_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_CONTACT_NAME)
            .to_string();

        let sender_signature = if signature.trim().is_empty() {
            sender.name.clone()
        } else {
            signature.to_string()
        };

        Self {
            company_name: company.name.clone(),
            contact_name,
            contact_title: text(&company.contact_title),
            bm_summary: text(&company.bm_summary),
            news_summary: text(&company.news_summary),
            sender_name: sender.name.clone(),
            sender_email: sender.email.clone(),
            custom_intro: String::new(),
            custom_proposal: String::new(),
            demo_link: String::new(),
            sender_signature,
        }
    }

    fn values(&self) -> [&str; 11] {
        [
            self.company_name.as_str(),
            self.contact_name.as_str(),
            self.contact_title.as_str(),
            self.bm_summary.as_str(),
            self.news_summary.as_str(),
            self.sender_name.as_str(),
            self.sender_email.as_str(),
            self.custom_intro.as_str(),
            self.custom_proposal.as_str(),
            self.demo_link.as_str(),
            self.sender_signature.as_str(),
        ]
    }

    fn lookup(&self, key: &str) -> &str {
        match key {
            "company_name" => &self.company_name,
            "contact_name" => &self.contact_name,
            "contact_title" => &self.contact_title,
            "bm_summary" => &self.bm_summary,
            "news_summary" => &self.news_summary,
            "sender_name" => &self.sender_name,
            "sender_email" => &self.sender_email,
            "custom_intro" => &self.custom_intro,
            "custom_proposal" => &self.custom_proposal,
            "demo_link" => &self.demo_link,
            "sender_signature" => &self.sender_signature,
            _ => "",
        }
    }
}

/// Substitute every placeholder in `text`.
///
/// Substitution repeats until no placeholder is left. Braces coming from
/// values are masked while it runs, so every pass removes four real braces
/// and the loop ends. Unmasking keeps a value's brace unless it would touch
/// a brace of the same direction; that one is written full-width instead.
/// The output therefore contains no placeholder and rendering it again is a
/// no-op.
pub fn render(text: &str, vars: &TemplateVars) -> String {
    let re = placeholder();
    if !re.is_match(text) {
        return text.to_string();
    }

    let mask = BraceMask::unused_in(text, vars);
    let mut out = text.to_string();
    while re.is_match(&out) {
        out = re
            .replace_all(&out, |caps: &Captures<'_>| mask.hide(vars.lookup(&caps[1])))
            .into_owned();
    }
    mask.restore(&out)
}

/// Stand-ins for value braces, picked from the private use area so they
/// collide with nothing in the template or the values.
struct BraceMask {
    open: char,
    close: char,
}

impl BraceMask {
    fn unused_in(text: &str, vars: &TemplateVars) -> Self {
        let used = |c: char| text.contains(c) || vars.values().iter().any(|v| v.contains(c));
        let mut free = ('\u{E000}'..='\u{F8FF}').filter(|c| !used(*c));
        let open = free.next().unwrap_or('\u{E000}');
        let close = free.next().unwrap_or('\u{E001}');
        Self { open, close }
    }

    /// Masks the value's braces; `{{` and `}}` collapse to one brace.
    fn hide(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut prev = None;
        for c in value.chars() {
            if matches!(c, '{' | '}') && prev == Some(c) {
                continue;
            }
            prev = Some(c);
            out.push(match c {
                '{' => self.open,
                '}' => self.close,
                c => c,
            });
        }
        out
    }

    fn restore(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let touches = |i: usize, real: char, masked: char| {
            let prev = i.checked_sub(1).and_then(|j| chars.get(j));
            let next = chars.get(i + 1);
            [prev, next]
                .into_iter()
                .flatten()
                .any(|&c| c == real || c == masked)
        };

        chars
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                if c == self.open {
                    if touches(i, '{', self.open) { '\u{FF5B}' } else { '{' }
                } else if c == self.close {
                    if touches(i, '}', self.close) { '\u{FF5D}' } else { '}' }
                } else {
                    c
                }
            })
            .collect()
    }
}
