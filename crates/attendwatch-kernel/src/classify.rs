use attendwatch_contracts::Direction;
use regex::Regex;

use crate::state::HistoryEntry;

#[derive(Debug, Clone, Default)]
pub struct ClassifierRules {
    pub bot_sender_id: String,
    pub manager_ids: Vec<String>,
    pub bot_patterns: Vec<String>,
    pub ender_patterns: Vec<String>,
    pub internal_keywords: Vec<String>,
    pub internal_emojis: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PatternTables {
    bot_sender_id: String,
    manager_ids: Vec<String>,
    bot_patterns: Vec<Regex>,
    ender_patterns: Vec<Regex>,
    internal_keywords: Vec<String>,
    internal_emojis: Vec<String>,
}

impl PatternTables {
    pub fn compile(rules: &ClassifierRules) -> Result<Self, String> {
        let bot_patterns = rules
            .bot_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| format!("invalid bot pattern '{p}': {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        // Enders only ever match the whole message.
        let ender_patterns = rules
            .ender_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{p})$"))
                    .map_err(|e| format!("invalid ender pattern '{p}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            bot_sender_id: rules.bot_sender_id.clone(),
            manager_ids: rules.manager_ids.clone(),
            bot_patterns,
            ender_patterns,
            internal_keywords: rules
                .internal_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            internal_emojis: rules
                .internal_emojis
                .iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        })
    }

    pub fn bot_sender_id(&self) -> &str {
        &self.bot_sender_id
    }

    pub fn is_bot_sender(&self, agent_id: Option<&str>) -> bool {
        agent_id == Some(self.bot_sender_id.as_str())
    }

    pub fn is_manager(&self, agent_id: &str) -> bool {
        self.manager_ids.iter().any(|m| m == agent_id)
    }

    pub fn is_automated(&self, agent_id: Option<&str>, text: Option<&str>) -> bool {
        if self.is_bot_sender(agent_id) {
            return true;
        }
        match text {
            Some(t) if !t.trim().is_empty() => self.bot_patterns.iter().any(|p| p.is_match(t)),
            _ => false,
        }
    }

    pub fn is_conversation_ender(&self, text: Option<&str>) -> bool {
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            return false;
        };
        self.ender_patterns.iter().any(|p| p.is_match(text))
    }

    pub fn is_internal(&self, sector: &str, name: Option<&str>, tags: &[String]) -> bool {
        let sector = sector.to_lowercase();
        let name = name.unwrap_or("").to_lowercase();
        let keyword_hit = |field: &str| self.internal_keywords.iter().any(|k| field.contains(k));

        tags.iter().any(|t| keyword_hit(&t.to_lowercase()))
            || keyword_hit(&sector)
            || keyword_hit(&name)
            || self
                .internal_emojis
                .iter()
                .any(|e| sector.contains(e.as_str()) || name.contains(e.as_str()))
    }

    pub fn has_human_reply<'a, I>(&self, history: I) -> bool
    where
        I: IntoIterator<Item = &'a HistoryEntry>,
    {
        history.into_iter().any(|entry| {
            entry.direction == Direction::Outbound
                && !entry.is_automated
                && entry
                    .agent_id
                    .as_deref()
                    .map(|id| !id.is_empty() && id != self.bot_sender_id && !self.is_manager(id))
                    .unwrap_or(false)
        })
    }
}

#[cfg(test)]
pub(crate) fn default_tables() -> PatternTables {
    PatternTables::compile(&ClassifierRules {
        bot_sender_id: "BOT_SYSTEM".to_string(),
        manager_ids: vec!["mgr-1".to_string()],
        bot_patterns: vec![
            r"(?i)ol[aá].*bem.*vindo".to_string(),
            r"(?i)como.*posso.*ajudar".to_string(),
            r"(?i)digite.*op[cç][aã]o".to_string(),
            r"(?i)menu.*principal".to_string(),
            r"(?m)^\s*\d+\s*[-.)]\s*\S".to_string(),
            r"(?i)hor[aá]rio\s+de\s+atendimento".to_string(),
        ],
        ender_patterns: vec![
            r"(?i)^(ok|okay|blz|beleza|obrigad[oa]|valeu|tchau)[.!]*$".to_string(),
            r"(?i)^(entendi|perfeito|certo)[.!]*$".to_string(),
            r"^(👍|👌|✅|🙏)[\x{1F3FB}-\x{1F3FF}]?\x{FE0F}?$".to_string(),
        ],
        internal_keywords: vec![
            "interno".to_string(),
            "equipe".to_string(),
            "grupos".to_string(),
            "Auto Fácil".to_string(),
        ],
        internal_emojis: vec!["🚙".to_string(), "🤍".to_string()],
    })
    .unwrap()
}
