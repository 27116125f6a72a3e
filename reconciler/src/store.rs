use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a store location served by the reservation platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreId {
    Shibuya,
    Ebisu,
    Hanzomon,
    Nakameguro,
    YoyogiUehara,
}

impl StoreId {
    pub fn slug(&self) -> &'static str {
        match self {
            StoreId::Shibuya => "shibuya",
            StoreId::Ebisu => "ebisu",
            StoreId::Hanzomon => "hanzomon",
            StoreId::Nakameguro => "nakameguro",
            StoreId::YoyogiUehara => "yoyogi-uehara",
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Everything the engine needs to know about one store: how its name shows
/// up in message text, how its room labels are spelled, and whether the
/// store has a hard ceiling on concurrent bookings.
///
/// Profiles are immutable values passed explicitly; there is no global
/// store table.
#[derive(Debug, Clone)]
pub struct StoreProfile {
    pub id: StoreId,
    /// Full store name as it appears in message bodies, e.g. "渋谷店".
    pub name: String,
    /// Bare keyword used for loose matching and cross-store exclusion,
    /// e.g. "渋谷". The full name always contains the keyword.
    pub keyword: String,
    /// Room label used when no room grammar matches the body.
    pub default_room: String,
    /// Maximum concurrent bookings in an overlapping time window, if the
    /// store's layout imposes one. Rooms are fungible for this count.
    pub max_slots: Option<u32>,
    /// Calendar the store syncs to, if any. Stores without one skip the
    /// calendar sink entirely.
    pub calendar_id: Option<String>,
}

static SHIBUYA_EQUIPMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"設備[：:]\s*渋谷店\s*STUDIO\s*([①②③④⑤⑥⑦])").unwrap());
static HANZOMON_EQUIPMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"設備[：:]\s*半蔵門店\s*(STUDIO B [①②③]|個室[AB])").unwrap());
static HANZOMON_ROOM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ルーム[：:]\s*【(STUDIO B [①②③])】").unwrap());
static HANZOMON_PRIVATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ルーム[：:]\s*【(個室[AB])】").unwrap());
static HANZOMON_STUDIO_AB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ルーム[：:]\s*【(STUDIO [AB])】").unwrap());
static NAKAMEGURO_EQUIPMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"設備[：:]\s*中目黒店\s*(フリーウエイトエリア|格闘技エリア)").unwrap());
static EBISU_ROOM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ルーム[：:]\s*【(STUDIO [AB])】").unwrap());

const CIRCLED_DIGITS: [&str; 7] = ["①", "②", "③", "④", "⑤", "⑥", "⑦"];

impl StoreProfile {
    /// Extract the room/area label from a message body using this store's
    /// label grammar. Unrecognized text falls back to the store default
    /// instead of failing the parse; the room is display-only and never
    /// part of slot identity.
    pub fn extract_room(&self, body: &str) -> String {
        match self.id {
            StoreId::Shibuya => {
                if let Some(captures) = SHIBUYA_EQUIPMENT.captures(body) {
                    return format!("STUDIO {}", &captures[1]);
                }
                for digit in CIRCLED_DIGITS {
                    if body.contains(&format!("STUDIO {digit}"))
                        || body.contains(&format!("STUDIO{digit}"))
                    {
                        return format!("STUDIO {digit}");
                    }
                }
                self.default_room.clone()
            }
            StoreId::Hanzomon => {
                if let Some(captures) = HANZOMON_EQUIPMENT.captures(body) {
                    return captures[1].to_string();
                }
                if let Some(captures) = HANZOMON_ROOM.captures(body) {
                    return captures[1].to_string();
                }
                for digit in ["①", "②", "③"] {
                    if body.contains(&format!("STUDIO B {digit}"))
                        || body.contains(&format!("STUDIO B{digit}"))
                    {
                        return format!("STUDIO B {digit}");
                    }
                }
                if let Some(captures) = HANZOMON_PRIVATE.captures(body) {
                    return captures[1].to_string();
                }
                // Ebisu-style labels show up in some hanzomon messages and
                // map onto the private rooms.
                if let Some(captures) = HANZOMON_STUDIO_AB.captures(body) {
                    return if &captures[1] == "STUDIO A" {
                        "個室A".to_string()
                    } else {
                        "個室B".to_string()
                    };
                }
                if body.contains("個室A") {
                    return "個室A".to_string();
                }
                if body.contains("個室B") {
                    return "個室B".to_string();
                }
                if body.contains("STUDIO A") {
                    return "個室A".to_string();
                }
                if body.contains("STUDIO B") {
                    return "個室B".to_string();
                }
                self.default_room.clone()
            }
            StoreId::Nakameguro => {
                if let Some(captures) = NAKAMEGURO_EQUIPMENT.captures(body) {
                    return captures[1].to_string();
                }
                if body.contains("フリーウエイトエリア") {
                    return "フリーウエイトエリア".to_string();
                }
                if body.contains("格闘技エリア") {
                    return "格闘技エリア".to_string();
                }
                self.default_room.clone()
            }
            StoreId::Ebisu => {
                if let Some(captures) = EBISU_ROOM.captures(body) {
                    return captures[1].to_string();
                }
                if body.contains("STUDIO A") {
                    return "STUDIO A".to_string();
                }
                if body.contains("STUDIO B") {
                    return "STUDIO B".to_string();
                }
                self.default_room.clone()
            }
            // Yoyogi-Uehara has two undifferentiated slots and no room
            // labels in its messages.
            StoreId::YoyogiUehara => self.default_room.clone(),
        }
    }
}

/// The set of store profiles an engine instance serves.
#[derive(Debug, Clone)]
pub struct StoreRegistry {
    profiles: Vec<StoreProfile>,
}

impl StoreRegistry {
    pub fn new(profiles: Vec<StoreProfile>) -> Self {
        Self { profiles }
    }

    /// Registry with all five production stores. Capacity ceilings follow
    /// the store layouts: shibuya has seven studios, nakameguro books a
    /// single free-weight area, ebisu and yoyogi-uehara have two rooms,
    /// hanzomon has three studio slots plus one private room.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            StoreProfile {
                id: StoreId::Shibuya,
                name: "渋谷店".to_string(),
                keyword: "渋谷".to_string(),
                default_room: "渋谷店".to_string(),
                max_slots: Some(7),
                calendar_id: None,
            },
            StoreProfile {
                id: StoreId::Ebisu,
                name: "恵比寿店".to_string(),
                keyword: "恵比寿".to_string(),
                default_room: "STUDIO A".to_string(),
                max_slots: Some(2),
                calendar_id: Some("ebisu".to_string()),
            },
            StoreProfile {
                id: StoreId::Hanzomon,
                name: "半蔵門店".to_string(),
                keyword: "半蔵門".to_string(),
                default_room: "個室B".to_string(),
                max_slots: Some(4),
                calendar_id: Some("hanzomon".to_string()),
            },
            StoreProfile {
                id: StoreId::Nakameguro,
                name: "中目黒店".to_string(),
                keyword: "中目黒".to_string(),
                default_room: "中目黒店".to_string(),
                max_slots: Some(1),
                calendar_id: None,
            },
            StoreProfile {
                id: StoreId::YoyogiUehara,
                name: "代々木上原店".to_string(),
                keyword: "代々木上原".to_string(),
                default_room: "代々木上原店".to_string(),
                max_slots: Some(2),
                calendar_id: None,
            },
        ])
    }

    pub fn profiles(&self) -> &[StoreProfile] {
        &self.profiles
    }

    pub fn get(&self, id: StoreId) -> Option<&StoreProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Primary applicability filter: the reservation platform serves other
    /// tenants, so a body mentioning none of our stores is not ours.
    pub fn mentions_any(&self, body: &str) -> bool {
        self.profiles.iter().any(|p| body.contains(&p.keyword))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: StoreId) -> StoreProfile {
        StoreRegistry::with_defaults().get(id).unwrap().clone()
    }

    #[test]
    fn shibuya_rooms_from_equipment_line() {
        let p = profile(StoreId::Shibuya);
        assert_eq!(p.extract_room("設備： 渋谷店 STUDIO ⑦ (1)"), "STUDIO ⑦");
        assert_eq!(p.extract_room("STUDIO ③ での予約"), "STUDIO ③");
        assert_eq!(p.extract_room("不明なルーム"), "渋谷店");
    }

    #[test]
    fn hanzomon_rooms_cover_both_grammars() {
        let p = profile(StoreId::Hanzomon);
        assert_eq!(p.extract_room("設備： 半蔵門店 STUDIO B ③ (1)"), "STUDIO B ③");
        assert_eq!(p.extract_room("ルーム： 【STUDIO B ①】"), "STUDIO B ①");
        assert_eq!(p.extract_room("ルーム：【STUDIO B②】"), "STUDIO B ②");
        assert_eq!(p.extract_room("ルーム： 【個室A】"), "個室A");
        // Ebisu-style label maps onto a private room.
        assert_eq!(p.extract_room("ルーム： 【STUDIO A】"), "個室A");
        assert_eq!(p.extract_room("不明なルーム"), "個室B");
    }

    #[test]
    fn nakameguro_areas() {
        let p = profile(StoreId::Nakameguro);
        assert_eq!(
            p.extract_room("設備： 中目黒店 フリーウエイトエリア（奥） (1)"),
            "フリーウエイトエリア"
        );
        assert_eq!(p.extract_room("ルーム： 【格闘技エリア（手前側）】"), "格闘技エリア");
        assert_eq!(p.extract_room("何もなし"), "中目黒店");
    }

    #[test]
    fn registry_mentions_any_requires_a_known_keyword() {
        let registry = StoreRegistry::with_defaults();
        assert!(registry.mentions_any("渋谷店の予約が確定しました"));
        assert!(!registry.mentions_any("ヨガスタジオの予約が確定しました"));
    }
}
