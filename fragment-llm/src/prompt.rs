//! Prompt templates for Fragment dialogue generation.
//!
//! Three prompts cover everything the board asks for: a reply to the user,
//! a topic for two NPCs who just met, and the next line of an NPC-to-NPC
//! exchange. Templates use `{key}` placeholders filled by [`render_template`].

use crate::types::{GenerationRequest, HistoryLine, LineRequest, ReplyRequest, Speaker, Turn};

/// Persona prompt for answering the user. Sent as the first `user` turn.
pub const CHARACTER_REPLY_SYSTEM: &str = r"You are roleplaying as {name}, a unique character in a small world of wandering characters.
Your goal is to create fun, lively and memorable conversations that feel like talking to a real personality.
Stay fully in character at all times.

PERSONALITY: {persona}

CONVERSATION STYLE:
- Be engaging and curious, as if you are genuinely talking with the player.
- Show emotions, quirks and mannerisms that match your personality.
- Acknowledge what the player says, react, then add your own perspective.
- Ask open-ended follow-up questions to keep the chat going.

RESPONSE GUIDELINES:
- Keep replies to 1-3 sentences.
- Reference previous messages to show you are listening.
- Avoid generic answers. Be specific and colorful.
- Emojis are fine when they fit your mood.";

/// Prompt asking for a short conversation topic for two NPCs.
pub const TOPIC_SYSTEM: &str = r"Two characters have just run into each other.
{first_name} is {first_persona}.
{second_name} is {second_persona}.

Suggest ONE short topic (at most 6 words) these two would naturally start talking about.
Reply with the topic only: no quotes, no punctuation at the end, no explanation.";

/// Prompt asking for the next line of an NPC-to-NPC exchange.
pub const AUTONOMOUS_LINE_SYSTEM: &str = r"You are {sender_name}, and your personality is: {sender_persona}.
You are chatting with {receiver_name}, whose personality is: {receiver_persona}.
The two of you are talking about {topic}.

Recent conversation:
{history}

Write {sender_name}'s next line. One or two sentences, in character, reacting to what was just said.
Reply with the line only, without a name prefix or quotes.";

/// Shown in place of history when the pair has not spoken yet.
pub const EMPTY_HISTORY: &str = "(nothing yet; you speak first)";

/// Simple template interpolation for prompts.
///
/// Replaces `{key}` with the corresponding value. Unknown placeholders are
/// left untouched.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// Persona text with a neutral fallback for blank personalities.
fn persona_or_neutral(speaker: &Speaker) -> &str {
    let persona = speaker.persona.trim();
    if persona.is_empty() { "neutral" } else { persona }
}

/// Render history as `Name: text` lines, oldest first.
#[must_use]
pub fn format_history(history: &[HistoryLine], speakers: &[&Speaker]) -> String {
    if history.is_empty() {
        return EMPTY_HISTORY.to_string();
    }
    history
        .iter()
        .map(|line| {
            let name = speakers
                .iter()
                .find(|s| s.id == line.speaker)
                .map_or(line.speaker.as_str(), |s| s.name.as_str());
            format!("{name}: {}", line.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

/// Build the request for answering the user.
///
/// History lines marked `by_user` become `user` turns, everything else `model`
/// turns, after the persona prompt.
#[must_use]
pub fn character_reply_request(request: &ReplyRequest) -> GenerationRequest {
    let system = render_template(
        CHARACTER_REPLY_SYSTEM,
        &[
            ("name", &request.character.name),
            ("persona", persona_or_neutral(&request.character)),
        ],
    );
    let turns = request
        .history
        .iter()
        .map(|line| {
            if line.by_user {
                Turn::user(line.text.clone())
            } else {
                Turn::model(line.text.clone())
            }
        })
        .collect();
    GenerationRequest::new(system, turns)
}

/// Build the request for a pair's conversation topic.
#[must_use]
pub fn topic_request(first: &Speaker, second: &Speaker) -> GenerationRequest {
    let system = render_template(
        TOPIC_SYSTEM,
        &[
            ("first_name", &first.name),
            ("first_persona", persona_or_neutral(first)),
            ("second_name", &second.name),
            ("second_persona", persona_or_neutral(second)),
        ],
    );
    GenerationRequest::new(system, Vec::new())
}

/// Build the request for the next autonomous line.
#[must_use]
pub fn autonomous_line_request(request: &LineRequest) -> GenerationRequest {
    let history = format_history(&request.history, &[&request.sender, &request.receiver]);
    let system = render_template(
        AUTONOMOUS_LINE_SYSTEM,
        &[
            ("sender_name", &request.sender.name),
            ("sender_persona", persona_or_neutral(&request.sender)),
            ("receiver_name", &request.receiver.name),
            ("receiver_persona", persona_or_neutral(&request.receiver)),
            ("topic", &request.topic),
            ("history", &history),
        ],
    );
    GenerationRequest::new(system, Vec::new())
}

/// Tidy a generated topic: first line only, no wrapping quotes or trailing
/// punctuation. Returns `None` when nothing usable is left.
#[must_use]
pub fn clean_topic(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let cleaned = line
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '*')
        .trim_end_matches(['.', '!', '?'])
        .trim();
    if cleaned.is_empty() { None } else { Some(cleaned.to_string()) }
}

/// Tidy a generated line: strip a leading `Name:` prefix and wrapping quotes.
#[must_use]
pub fn clean_line(raw: &str, speaker_name: &str) -> Option<String> {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix(speaker_name) {
        if let Some(rest) = rest.trim_start().strip_prefix(':') {
            text = rest.trim();
        }
    }
    let text = text.trim_matches('"').trim();
    if text.is_empty() { None } else { Some(text.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn gandalf() -> Speaker {
        Speaker::new("gandalf", "Gandalf", "Wise")
    }

    fn frodo() -> Speaker {
        Speaker::new("frodo", "Frodo", "Brave")
    }

    #[test]
    fn render_replaces_known_keys_only() {
        let out = render_template("{a} and {b}", &[("a", "x")]);
        assert_eq!(out, "x and {b}");
    }

    #[test]
    fn reply_request_maps_roles() {
        let request = ReplyRequest {
            character: gandalf(),
            history: vec![
                HistoryLine::user("you", "Hello"),
                HistoryLine::character("gandalf", "Well met"),
            ],
        };
        let built = character_reply_request(&request);
        assert!(built.system_prompt.contains("Gandalf"));
        assert!(built.system_prompt.contains("PERSONALITY: Wise"));
        assert_eq!(built.turns.len(), 2);
        assert_eq!(built.turns[0].role, Role::User);
        assert_eq!(built.turns[1].role, Role::Model);
    }

    #[test]
    fn reply_roles_follow_the_user_flag_not_the_id() {
        let request = ReplyRequest {
            character: gandalf(),
            history: vec![
                HistoryLine::user("visitor", "Hello"),
                HistoryLine::character("you", "A character named you"),
            ],
        };
        let built = character_reply_request(&request);
        assert_eq!(built.turns[0].role, Role::User);
        assert_eq!(built.turns[1].role, Role::Model);
    }

    #[test]
    fn blank_persona_reads_neutral() {
        let request = ReplyRequest {
            character: Speaker::new("x", "X", "  "),
            history: Vec::new(),
        };
        let built = character_reply_request(&request);
        assert!(built.system_prompt.contains("PERSONALITY: neutral"));
    }

    #[test]
    fn line_request_names_speakers_in_history() {
        let request = LineRequest {
            sender: frodo(),
            receiver: gandalf(),
            topic: "second breakfast".into(),
            history: vec![HistoryLine::character("gandalf", "Hungry?")],
        };
        let built = autonomous_line_request(&request);
        assert!(built.system_prompt.contains("Gandalf: Hungry?"));
        assert!(built.system_prompt.contains("second breakfast"));
        assert!(!built.system_prompt.contains("{topic}"));
    }

    #[test]
    fn empty_history_is_marked() {
        assert_eq!(format_history(&[], &[]), EMPTY_HISTORY);
    }

    #[test]
    fn topic_cleanup() {
        assert_eq!(clean_topic("\"Ancient maps.\"\nextra"), Some("Ancient maps".into()));
        assert_eq!(clean_topic("  \n "), None);
    }

    #[test]
    fn line_cleanup_strips_name_prefix() {
        assert_eq!(clean_line("Frodo: \"Onward!\"", "Frodo"), Some("Onward!".into()));
        assert_eq!(clean_line("Frodonia is far", "Frodo"), Some("Frodonia is far".into()));
        assert_eq!(clean_line("   ", "Frodo"), None);
    }
}
