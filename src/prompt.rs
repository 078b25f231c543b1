use reedline::{Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus};
use std::borrow::Cow;

/// `server@database> `, with a marker while the session has no connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellPrompt {
    server: String,
    database: String,
    connected: bool,
}

impl ShellPrompt {
    pub fn new(server: &str, database: &str) -> Self {
        Self {
            server: server.to_string(),
            database: database.to_string(),
            connected: true,
        }
    }

    pub fn update(&mut self, database: &str, connected: bool) {
        self.database = database.to_string();
        self.connected = connected;
    }

    pub fn text(&self) -> String {
        if self.connected {
            format!("{}@{}> ", self.server, self.database)
        } else {
            format!("{}@{} (disconnected)> ", self.server, self.database)
        }
    }
}

impl Prompt for ShellPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(self.text())
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, edit_mode: PromptEditMode) -> Cow<'_, str> {
        match edit_mode {
            PromptEditMode::Default | PromptEditMode::Emacs => Cow::Borrowed(""),
            PromptEditMode::Vi(vi_mode) => match vi_mode {
                reedline::PromptViMode::Insert => Cow::Borrowed("[INS] "),
                reedline::PromptViMode::Normal => Cow::Borrowed("[NOR] "),
            },
            PromptEditMode::Custom(_) => Cow::Borrowed(""),
        }
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        match history_search.term.as_str() {
            "" => Cow::Owned(format!("({prefix}reverse-i-search): ")),
            term => Cow::Owned(format!("({prefix}reverse-i-search '{term}'): ")),
        }
    }
}
