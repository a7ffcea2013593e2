//! Pseudonyms shown on relayed anonymous messages.
//!
//! A pseudonym is derived from a server-side salt, the guild, the author and
//! the UTC day. Readers can follow a conversation within a day without
//! learning who wrote what, and names rotate at midnight.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::snowflake::Snowflake;

const ADJECTIVES: [&str; 16] = [
    "Amber", "Brisk", "Calm", "Dusky", "Eager", "Fuzzy", "Gentle", "Hidden", "Ivory", "Jolly",
    "Keen", "Lucky", "Misty", "Nimble", "Quiet", "Rustic",
];

const ANIMALS: [&str; 16] = [
    "Badger", "Crane", "Dingo", "Egret", "Ferret", "Gecko", "Heron", "Ibis", "Jackal", "Koala",
    "Lemur", "Marten", "Newt", "Otter", "Puffin", "Raven",
];

fn digest(salt: &str, guild_id: Snowflake, user_id: Snowflake, day: NaiveDate) -> [u8; 32] {
    let mut hasher = Sha256::new();
    // separators keep `("a", 12)` and `("a1", 2)` apart
    hasher.update(salt.as_bytes());
    hasher.update([0u8]);
    hasher.update(guild_id.get().to_be_bytes());
    hasher.update(user_id.get().to_be_bytes());
    hasher.update(day.to_string().as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Build the pseudonym of `user_id` in `guild_id` for `day`.
pub fn pseudonym(salt: &str, guild_id: Snowflake, user_id: Snowflake, day: NaiveDate) -> String {
    let hash = digest(salt, guild_id, user_id, day);
    format!(
        "{} {} {:02x}",
        ADJECTIVES[(hash[0] & 0x0f) as usize],
        ANIMALS[(hash[1] & 0x0f) as usize],
        hash[2]
    )
}
