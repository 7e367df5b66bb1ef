//! Prompt construction.

use std::fmt::Write as _;

use quill_core::{BrandProfile, Trend};

/// Maximum number of research hits quoted into a prompt.
const MAX_TRENDS: usize = 5;

pub fn system_prompt(brand: &BrandProfile) -> String {
    let mut prompt = format!("You write social media posts for {}.", brand.name);
    if !brand.industry.is_empty() {
        let _ = write!(prompt, " Industry: {}.", brand.industry);
    }
    if !brand.voice.is_empty() {
        let _ = write!(prompt, " Voice: {}.", brand.voice);
    }
    if !brand.target_audience.is_empty() {
        let _ = write!(prompt, " Audience: {}.", brand.target_audience);
    }
    let avoid: Vec<&str> = brand
        .anti_topics
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if !avoid.is_empty() {
        let _ = write!(prompt, " Never mention: {}.", avoid.join(", "));
    }
    prompt.push_str(" Reply with the post text only.");
    prompt
}

/// User prompt for one post. `avoid` carries a previous draft to steer away from.
pub fn post_prompt(topic: &str, trends: &[Trend], avoid: Option<&str>) -> String {
    let mut prompt = format!("Write a post about {topic}.\n");
    if !trends.is_empty() {
        prompt.push_str("\nRecent developments:\n");
        for trend in trends.iter().take(MAX_TRENDS) {
            let _ = writeln!(prompt, "- {}: {}", trend.title, trend.snippet);
        }
    }
    if let Some(previous) = avoid {
        let _ = write!(
            prompt,
            "\nTake a clearly different angle from this earlier post:\n{previous}\n"
        );
    }
    prompt
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use quill_core::BrandId;

    use super::*;

    #[test]
    fn topic_leads_the_user_prompt() {
        let trend = Trend {
            query: "AI".into(),
            title: "New chip".into(),
            snippet: "Faster".into(),
            url: String::new(),
            timestamp: Utc::now(),
        };
        let prompt = post_prompt("AI", &[trend], Some("old text"));

        assert!(prompt.starts_with("Write a post about AI."));
        assert!(prompt.contains("- New chip: Faster"));
        assert!(prompt.contains("old text"));
    }

    #[test]
    fn system_prompt_lists_anti_topics() {
        let brand = BrandProfile::new(BrandId::parse("acme").unwrap(), "Acme")
            .with_anti_topics(["politics", " ", "crypto"]);
        assert!(system_prompt(&brand).contains("Never mention: politics, crypto."));
    }
}
