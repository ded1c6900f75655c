//! Canned dialogue used when the generation service is unavailable.
//!
//! Always available, no I/O. Lines are picked from a fixed table keyed by
//! [`Trait`]; unrecognised personalities use the `Neutral` table. The caller
//! supplies the RNG so tests can seed it.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::types::Trait;

/// Replies any character may give.
const BASE_REPLIES: &[&str] = &[
    "Hmm, interesting...",
    "I was just thinking about that!",
    "The road goes ever on and on.",
    "Indeed.",
    "A curious thought, friend.",
    "I see. Go on...",
    "Ha! That made me smile.",
    "Let us be vigilant.",
    "I agree.",
    "Can you tell me more?",
];

fn trait_replies(personality: Trait) -> &'static [&'static str] {
    match personality {
        Trait::Brave => &[
            "Fear is just another road to walk. Lead on!",
            "If there's danger ahead, I'll stand beside you.",
            "Ha! I've faced worse before breakfast.",
        ],
        Trait::Wise => &[
            "Patience. All things reveal themselves in time.",
            "There is more to that than meets the eye.",
            "Even the smallest choice can change the course of the future.",
        ],
        Trait::Cheerful => &[
            "Oh, that's wonderful! Tell me everything!",
            "You always brighten my day, you know that?",
            "Hee hee, what a delightful thing to say!",
        ],
        Trait::Grumpy => &[
            "Hmph. If you say so.",
            "Is that all? I have better things to do.",
            "Don't expect me to be impressed.",
        ],
        Trait::Curious => &[
            "Ooh, and then what happened?",
            "Wait, how does that even work?",
            "I've always wondered about that! Go on!",
        ],
        Trait::Mysterious => &[
            "Some things are better left unsaid...",
            "Perhaps. Perhaps not.",
            "You know less than you think. But you're learning.",
        ],
        Trait::Neutral => &[
            "Well, that's something to think about.",
            "Fair enough.",
        ],
    }
}

fn trait_lines(personality: Trait) -> &'static [&'static str] {
    match personality {
        Trait::Brave => &[
            "Speaking of {topic}, I say we face it head on.",
            "{topic}? Nothing a steady blade and a steady heart can't handle.",
        ],
        Trait::Wise => &[
            "I have pondered {topic} for many years, and I'm still learning.",
            "When it comes to {topic}, the old stories hold more truth than you'd think.",
        ],
        Trait::Cheerful => &[
            "Oh, {topic} is my favourite thing to chat about!",
            "Haha, {topic} always puts me in a good mood!",
        ],
        Trait::Grumpy => &[
            "{topic} again? Fine. But I'm not happy about it.",
            "Everyone goes on about {topic}. Overrated, if you ask me.",
        ],
        Trait::Curious => &[
            "What do you really think about {topic}? I must know!",
            "I've got so many questions about {topic}.",
        ],
        Trait::Mysterious => &[
            "There's a secret about {topic} few people know...",
            "{topic}... yes. I know more than I can say.",
        ],
        Trait::Neutral => &[
            "So, about {topic}. What's your take?",
            "I've been meaning to talk about {topic}.",
            "{topic} is on my mind lately.",
        ],
    }
}

fn trait_topics(personality: Trait) -> &'static [&'static str] {
    match personality {
        Trait::Brave => &["the greatest battle they ever fought", "a dragon sighted in the hills"],
        Trait::Wise => &["an old prophecy", "what makes a good life"],
        Trait::Cheerful => &["the upcoming harvest festival", "their favourite songs"],
        Trait::Grumpy => &["the terrible weather lately", "noisy neighbours"],
        Trait::Curious => &["a strange map found at the market", "where the river really ends"],
        Trait::Mysterious => &["a locked door nobody opens", "lights seen in the forest at night"],
        Trait::Neutral => &["the weather", "the local gossip", "casual conversation"],
    }
}

/// A canned reply for user-facing chat.
///
/// The pool mixes the base replies, the personality table, a few lines
/// flavoured with the raw trait text, and (when `user_message` is given)
/// lines quoting the start of what the user said.
#[must_use]
pub fn reply<R: Rng + ?Sized>(
    rng: &mut R,
    personality: Trait,
    trait_text: &str,
    user_message: Option<&str>,
) -> String {
    let mut pool: Vec<String> = BASE_REPLIES.iter().map(|s| (*s).to_string()).collect();
    pool.extend(trait_replies(personality).iter().map(|s| (*s).to_string()));

    let trait_text = trait_text.trim();
    if !trait_text.is_empty() {
        let lowered = trait_text.to_lowercase();
        pool.push(format!("In a {lowered} mood today."));
        pool.push(format!("{trait_text} as ever!"));
        pool.push(format!("Such a {lowered} notion."));
    }

    if let Some(message) = user_message.map(str::trim).filter(|m| !m.is_empty()) {
        pool.push(format!("About that: \"{}\"...", truncate_chars(message, 40)));
        pool.push(format!("You said \"{}\", fascinating.", truncate_chars(message, 25)));
    }

    pool.choose(rng).cloned().unwrap_or_else(|| BASE_REPLIES[0].to_string())
}

/// A canned line for one NPC speaking to another about `topic`.
#[must_use]
pub fn line<R: Rng + ?Sized>(rng: &mut R, personality: Trait, topic: &str) -> String {
    let template = trait_lines(personality)
        .choose(rng)
        .copied()
        .unwrap_or("So, about {topic}.");
    capitalize_first(&template.replace("{topic}", topic))
}

/// A canned topic for a pair, drawn from the first participant's table with
/// the second participant's table as an alternative.
#[must_use]
pub fn topic<R: Rng + ?Sized>(rng: &mut R, personalities: &[Trait]) -> String {
    let pool: Vec<&str> = personalities
        .iter()
        .take(2)
        .flat_map(|t| trait_topics(*t).iter().copied())
        .collect();
    pool.choose(rng)
        .copied()
        .unwrap_or("casual conversation")
        .to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
