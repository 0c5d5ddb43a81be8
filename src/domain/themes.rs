//! Bundled color palettes selectable from the settings screen.

use serde::Serialize;

pub const DEFAULT_THEME_ID: &str = "cosmic-purple";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThemeColors {
    pub id: &'static str,
    pub name: &'static str,
    pub primary: &'static str,
    pub secondary: &'static str,
    pub accent: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_gradient: Option<&'static str>,
    pub card_background: &'static str,
    pub text_color: &'static str,
    pub secondary_text_color: &'static str,
    pub font_family: &'static str,
}

const SPACE_FONT: &str = "'Orbitron', 'Inter', sans-serif";
const CLEAN_FONT: &str = "'Inter', 'Segoe UI', sans-serif";

static THEMES: [ThemeColors; 10] = [
    ThemeColors {
        id: "cosmic-purple",
        name: "Cosmic Purple",
        primary: "#7c3aed",
        secondary: "#a78bfa",
        accent: "#f472b6",
        description: "Deep violet nebula with pink starlight",
        background: Some("#0f0a1e"),
        background_gradient: Some("linear-gradient(135deg, #0f0a1e 0%, #2e1065 100%)"),
        card_background: "rgba(46, 16, 101, 0.55)",
        text_color: "#f5f3ff",
        secondary_text_color: "#c4b5fd",
        font_family: SPACE_FONT,
    },
    ThemeColors {
        id: "emerald-nebula",
        name: "Emerald Nebula",
        primary: "#059669",
        secondary: "#34d399",
        accent: "#a7f3d0",
        description: "Green gas clouds lit by young stars",
        background: Some("#03140f"),
        background_gradient: Some("linear-gradient(135deg, #03140f 0%, #064e3b 100%)"),
        card_background: "rgba(6, 78, 59, 0.55)",
        text_color: "#ecfdf5",
        secondary_text_color: "#6ee7b7",
        font_family: SPACE_FONT,
    },
    ThemeColors {
        id: "solar-flare",
        name: "Solar Flare",
        primary: "#ea580c",
        secondary: "#fb923c",
        accent: "#fde047",
        description: "Burning orange corona with golden bursts",
        background: Some("#1c0a02"),
        background_gradient: Some("linear-gradient(135deg, #1c0a02 0%, #7c2d12 100%)"),
        card_background: "rgba(124, 45, 18, 0.5)",
        text_color: "#fff7ed",
        secondary_text_color: "#fdba74",
        font_family: SPACE_FONT,
    },
    ThemeColors {
        id: "deep-ocean",
        name: "Deep Ocean",
        primary: "#0369a1",
        secondary: "#38bdf8",
        accent: "#22d3ee",
        description: "Calm blues from the bottom of the sea",
        background: Some("#020c1b"),
        background_gradient: None,
        card_background: "rgba(12, 74, 110, 0.55)",
        text_color: "#f0f9ff",
        secondary_text_color: "#7dd3fc",
        font_family: CLEAN_FONT,
    },
    ThemeColors {
        id: "aurora-borealis",
        name: "Aurora Borealis",
        primary: "#14b8a6",
        secondary: "#818cf8",
        accent: "#4ade80",
        description: "Northern lights dancing over a polar night",
        background: None,
        background_gradient: Some("linear-gradient(160deg, #022c22 0%, #1e1b4b 60%, #042f2e 100%)"),
        card_background: "rgba(30, 27, 75, 0.5)",
        text_color: "#f0fdfa",
        secondary_text_color: "#99f6e4",
        font_family: CLEAN_FONT,
    },
    ThemeColors {
        id: "crimson-nova",
        name: "Crimson Nova",
        primary: "#dc2626",
        secondary: "#f87171",
        accent: "#fbbf24",
        description: "A red giant collapsing into brilliance",
        background: Some("#1a0505"),
        background_gradient: Some("linear-gradient(135deg, #1a0505 0%, #7f1d1d 100%)"),
        card_background: "rgba(127, 29, 29, 0.5)",
        text_color: "#fef2f2",
        secondary_text_color: "#fca5a5",
        font_family: SPACE_FONT,
    },
    ThemeColors {
        id: "midnight-eclipse",
        name: "Midnight Eclipse",
        primary: "#334155",
        secondary: "#64748b",
        accent: "#e2e8f0",
        description: "Monochrome shadows with a silver rim",
        background: Some("#020617"),
        background_gradient: None,
        card_background: "rgba(30, 41, 59, 0.7)",
        text_color: "#f8fafc",
        secondary_text_color: "#94a3b8",
        font_family: CLEAN_FONT,
    },
    ThemeColors {
        id: "golden-galaxy",
        name: "Golden Galaxy",
        primary: "#ca8a04",
        secondary: "#facc15",
        accent: "#fef08a",
        description: "Spiral arms dusted with gold",
        background: Some("#151002"),
        background_gradient: Some("linear-gradient(135deg, #151002 0%, #713f12 100%)"),
        card_background: "rgba(113, 63, 18, 0.5)",
        text_color: "#fefce8",
        secondary_text_color: "#fde68a",
        font_family: SPACE_FONT,
    },
    ThemeColors {
        id: "ice-comet",
        name: "Ice Comet",
        primary: "#0ea5e9",
        secondary: "#bae6fd",
        accent: "#e0f2fe",
        description: "Frozen tail streaking past a pale sun",
        background: Some("#f0f9ff"),
        background_gradient: Some("linear-gradient(135deg, #f0f9ff 0%, #bae6fd 100%)"),
        card_background: "rgba(255, 255, 255, 0.75)",
        text_color: "#0c4a6e",
        secondary_text_color: "#0369a1",
        font_family: CLEAN_FONT,
    },
    ThemeColors {
        id: "rose-quasar",
        name: "Rose Quasar",
        primary: "#db2777",
        secondary: "#f9a8d4",
        accent: "#c084fc",
        description: "Soft pink radiance from a distant core",
        background: Some("#1f0714"),
        background_gradient: Some("linear-gradient(135deg, #1f0714 0%, #831843 100%)"),
        card_background: "rgba(131, 24, 67, 0.5)",
        text_color: "#fdf2f8",
        secondary_text_color: "#f9a8d4",
        font_family: SPACE_FONT,
    },
];

pub fn list_themes() -> &'static [ThemeColors] {
    &THEMES
}

pub fn find_theme(theme_id: &str) -> Option<&'static ThemeColors> {
    let theme_id = theme_id.trim();
    THEMES.iter().find(|theme| theme.id == theme_id)
}

pub fn default_theme() -> &'static ThemeColors {
    &THEMES[0]
}

/// Resolves a stored theme id, falling back to the default palette.
pub fn resolve_theme(theme_id: &str) -> &'static ThemeColors {
    find_theme(theme_id).unwrap_or_else(default_theme)
}
