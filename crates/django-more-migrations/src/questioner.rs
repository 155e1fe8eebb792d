//! Questions the autodetector asks when a change is ambiguous.
//!
//! A rename looks exactly like a removal plus an addition, so the
//! autodetector asks before treating it as one. Non-interactive runs answer
//! from configured defaults, keyed by question name.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use serde_json::Value as Json;

use django_more_core::MigrationSettings;

/// Answers yes/no, multiple-choice and free-text questions.
pub trait MigrationQuestioner {
    fn is_interactive(&self) -> bool;

    /// Configured answers, keyed by question name.
    fn defaults(&self) -> &HashMap<String, Json>;

    fn default_for(&self, key: &str) -> Option<&Json> {
        self.defaults().get(key)
    }

    /// A yes/no question. `default` is used when nothing is configured
    /// under `key` and no answer can be read.
    fn ask_boolean(&mut self, key: &str, prompt: &str, default: bool) -> bool;

    /// Picks one of `choices`, returning its index.
    fn ask_choice(&mut self, key: &str, prompt: &str, choices: &[String], default: usize) -> usize;

    fn ask_text(&mut self, key: &str, prompt: &str) -> Option<String>;

    /// Whether field `old_name` on `model_name` was renamed to `new_name`.
    fn ask_rename(&mut self, model_name: &str, old_name: &str, new_name: &str, field_type: &str) -> bool {
        self.ask_boolean(
            "ask_rename",
            &format!("Did you rename {model_name}.{old_name} to {model_name}.{new_name} (a {field_type})? [y/N]"),
            false,
        )
    }
}

fn configured_boolean(value: Option<&Json>) -> Option<bool> {
    match value? {
        Json::Bool(b) => Some(*b),
        Json::String(s) => parse_yes_no(s),
        _ => None,
    }
}

fn configured_choice(value: Option<&Json>, choices: &[String]) -> Option<usize> {
    match value? {
        Json::Number(n) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n < choices.len()),
        Json::String(s) => choices.iter().position(|c| c == s),
        _ => None,
    }
}

fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => Some(true),
        "n" | "no" | "false" => Some(false),
        _ => None,
    }
}

// ── NonInteractiveQuestioner ────────────────────────────────────────────

/// Answers from configured defaults only.
#[derive(Debug, Clone, Default)]
pub struct NonInteractiveQuestioner {
    defaults: HashMap<String, Json>,
}

impl NonInteractiveQuestioner {
    pub fn new(defaults: HashMap<String, Json>) -> Self {
        Self { defaults }
    }

    #[must_use]
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }
}

impl MigrationQuestioner for NonInteractiveQuestioner {
    fn is_interactive(&self) -> bool {
        false
    }

    fn defaults(&self) -> &HashMap<String, Json> {
        &self.defaults
    }

    fn ask_boolean(&mut self, key: &str, _prompt: &str, default: bool) -> bool {
        configured_boolean(self.default_for(key)).unwrap_or(default)
    }

    fn ask_choice(&mut self, key: &str, _prompt: &str, choices: &[String], default: usize) -> usize {
        configured_choice(self.default_for(key), choices).unwrap_or(default)
    }

    fn ask_text(&mut self, key: &str, _prompt: &str) -> Option<String> {
        self.default_for(key).and_then(Json::as_str).map(str::to_string)
    }
}

// ── InteractiveQuestioner ───────────────────────────────────────────────

/// Prompts on `output` and reads answers from `input`.
///
/// Configured defaults still win over prompting. An unreadable or empty
/// answer takes the question's default.
pub struct InteractiveQuestioner<R, W> {
    input: R,
    output: W,
    defaults: HashMap<String, Json>,
}

impl InteractiveQuestioner<io::StdinLock<'static>, io::Stdout> {
    /// Prompts on the terminal.
    pub fn stdio(defaults: HashMap<String, Json>) -> Self {
        Self::new(io::stdin().lock(), io::stdout(), defaults)
    }
}

impl<R: BufRead, W: Write> InteractiveQuestioner<R, W> {
    pub fn new(input: R, output: W, defaults: HashMap<String, Json>) -> Self {
        Self {
            input,
            output,
            defaults,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn say(&mut self, line: &str) {
        if let Err(e) = writeln!(self.output, "{line}") {
            tracing::warn!(error = %e, "could not write migration question");
        }
    }

    fn prompt(&mut self, prompt: &str) -> Option<String> {
        if let Err(e) = write!(self.output, "{prompt} ").and_then(|()| self.output.flush()) {
            tracing::warn!(error = %e, "could not write migration question");
            return None;
        }
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "could not read migration answer");
                None
            }
        }
    }
}

impl<R: BufRead, W: Write> MigrationQuestioner for InteractiveQuestioner<R, W> {
    fn is_interactive(&self) -> bool {
        true
    }

    fn defaults(&self) -> &HashMap<String, Json> {
        &self.defaults
    }

    fn ask_boolean(&mut self, key: &str, prompt: &str, default: bool) -> bool {
        if let Some(answer) = configured_boolean(self.default_for(key)) {
            return answer;
        }
        loop {
            let Some(answer) = self.prompt(prompt) else {
                return default;
            };
            if answer.is_empty() {
                return default;
            }
            if let Some(answer) = parse_yes_no(&answer) {
                return answer;
            }
            self.say("Please answer y or n.");
        }
    }

    fn ask_choice(&mut self, key: &str, prompt: &str, choices: &[String], default: usize) -> usize {
        if let Some(answer) = configured_choice(self.default_for(key), choices) {
            return answer;
        }
        self.say(prompt);
        for (i, choice) in choices.iter().enumerate() {
            self.say(&format!(" {}) {choice}", i + 1));
        }
        loop {
            let Some(answer) = self.prompt("Select an option:") else {
                return default;
            };
            if answer.is_empty() {
                return default;
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=choices.len()).contains(&n) => return n - 1,
                _ => {
                    self.say("Please select a valid option.");
                }
            }
        }
    }

    fn ask_text(&mut self, key: &str, prompt: &str) -> Option<String> {
        if let Some(answer) = self.default_for(key).and_then(Json::as_str) {
            return Some(answer.to_string());
        }
        self.prompt(prompt).filter(|answer| !answer.is_empty())
    }
}

/// The questioner `settings` ask for: interactive on the terminal, or
/// answering from `questioner_defaults`.
pub fn from_settings(settings: &MigrationSettings) -> Box<dyn MigrationQuestioner> {
    if settings.interactive {
        Box::new(InteractiveQuestioner::stdio(settings.questioner_defaults.clone()))
    } else {
        Box::new(NonInteractiveQuestioner::new(settings.questioner_defaults.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn interactive(input: &str) -> InteractiveQuestioner<Cursor<Vec<u8>>, Vec<u8>> {
        InteractiveQuestioner::new(Cursor::new(input.as_bytes().to_vec()), Vec::new(), HashMap::new())
    }

    fn choices() -> Vec<String> {
        vec!["keep".into(), "delete".into(), "fail".into()]
    }

    // ── Non-interactive ──

    #[test]
    fn test_non_interactive_uses_question_default() {
        let mut q = NonInteractiveQuestioner::default();
        assert!(!q.is_interactive());
        assert!(!q.ask_rename("post", "title", "headline", "CharField"));
        assert!(q.ask_boolean("anything", "?", true));
        assert_eq!(q.ask_choice("pick", "?", &choices(), 2), 2);
        assert_eq!(q.ask_text("name", "?"), None);
    }

    #[test]
    fn test_non_interactive_configured_answers() {
        let mut q = NonInteractiveQuestioner::default()
            .with_default("ask_rename", true)
            .with_default("pick", "delete")
            .with_default("name", "draft");
        assert!(q.ask_rename("post", "title", "headline", "CharField"));
        assert_eq!(q.ask_choice("pick", "?", &choices(), 0), 1);
        assert_eq!(q.ask_text("name", "?").as_deref(), Some("draft"));
    }

    #[test]
    fn test_configured_choice_out_of_range_falls_back() {
        let mut q = NonInteractiveQuestioner::default().with_default("pick", 9);
        assert_eq!(q.ask_choice("pick", "?", &choices(), 0), 0);
    }

    #[test]
    fn test_configured_boolean_accepts_strings() {
        let mut q = NonInteractiveQuestioner::new(HashMap::from([("k".to_string(), json!("yes"))]));
        assert!(q.ask_boolean("k", "?", false));
    }

    // ── Interactive ──

    #[test]
    fn test_interactive_boolean() {
        let mut q = interactive("maybe\ny\n");
        assert!(q.ask_boolean("k", "Rename? [y/N]", false));
        let out = String::from_utf8(q.into_output()).unwrap();
        assert!(out.contains("Rename? [y/N]"));
        assert!(out.contains("Please answer y or n."));
    }

    #[test]
    fn test_interactive_eof_takes_default() {
        let mut q = interactive("");
        assert!(q.ask_boolean("k", "?", true));
        assert_eq!(q.ask_choice("k", "?", &choices(), 1), 1);
        assert_eq!(q.ask_text("k", "?"), None);
    }

    #[test]
    fn test_interactive_choice_menu() {
        let mut q = interactive("7\n3\n");
        assert_eq!(q.ask_choice("k", "What now?", &choices(), 0), 2);
        let out = String::from_utf8(q.into_output()).unwrap();
        assert!(out.contains(" 1) keep"));
        assert!(out.contains("Please select a valid option."));
    }

    #[test]
    fn test_interactive_configured_default_skips_prompt() {
        let mut q = InteractiveQuestioner::new(
            Cursor::new(Vec::new()),
            Vec::new(),
            HashMap::from([("ask_rename".to_string(), json!(true))]),
        );
        assert!(q.ask_rename("post", "a", "b", "TextField"));
        assert!(q.into_output().is_empty());
    }

    struct ClosedOutput;

    impl Write for ClosedOutput {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_closed_output_falls_back_to_defaults() {
        let mut q = InteractiveQuestioner::new(Cursor::new(b"2\ny\n".to_vec()), ClosedOutput, HashMap::new());
        assert_eq!(q.ask_choice("ask_remove", "What now?", &choices(), 2), 2);
        assert!(!q.ask_boolean("ask_rename", "Rename?", false));
    }

    #[test]
    fn test_from_settings() {
        let settings = MigrationSettings::default();
        assert!(!from_settings(&settings).is_interactive());
    }
}
