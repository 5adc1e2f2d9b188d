use log::warn;
use plot_metrics::figure::SeriesStyle;
use plotters::style::RGBColor;
use std::collections::HashMap;

pub const DEFAULT_COLOUR: RGBColor = RGBColor(0x33, 0x33, 0x33);
pub const UNSERVED_COLOUR: RGBColor = RGBColor(0xDD, 0x02, 0x00);

/// Scenario colours, reused in order once exhausted.
pub const SCENARIO_PALETTE: [RGBColor; 10] = [
    RGBColor(0x39, 0x6A, 0xB1),
    RGBColor(0xCC, 0x25, 0x29),
    RGBColor(0x3E, 0x96, 0x51),
    RGBColor(0xFF, 0x7F, 0x00),
    RGBColor(0x6B, 0x4C, 0x9A),
    RGBColor(0x92, 0x24, 0x28),
    RGBColor(0xCA, 0xB2, 0xD6),
    RGBColor(0x6A, 0x3D, 0x9A),
    RGBColor(0xFB, 0x9A, 0x99),
    RGBColor(0xB1, 0x59, 0x28),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Triangle,
    Circle,
    Cross,
    Square,
}

const MARKERS: [Marker; 4] = [Marker::Triangle, Marker::Circle, Marker::Cross, Marker::Square];

/// `#RRGGBB` (leading `#` optional) to a plotters colour.
pub fn parse_hex(value: &str) -> Option<RGBColor> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}

/// Resolves series styles to colours and markers.
#[derive(Debug, Clone, Default)]
pub struct Styles {
    tech_colours: HashMap<String, RGBColor>,
}

impl Styles {
    pub fn from_dictionary(colours: &HashMap<String, String>) -> Self {
        let mut tech_colours = HashMap::new();
        for (tech, hex) in colours {
            match parse_hex(hex) {
                Some(colour) => {
                    tech_colours.insert(tech.clone(), colour);
                }
                None => warn!("Colour '{}' for {} is not a hex colour, using default", hex, tech),
            }
        }
        Self { tech_colours }
    }

    pub fn tech_colour(&self, tech: &str) -> RGBColor {
        self.tech_colours.get(tech).copied().unwrap_or(DEFAULT_COLOUR)
    }

    pub fn colour(&self, style: &SeriesStyle) -> RGBColor {
        match style {
            SeriesStyle::Technology(tech) => self.tech_colour(tech),
            SeriesStyle::Scenario(idx) | SeriesStyle::Plain(idx) => {
                SCENARIO_PALETTE[idx % SCENARIO_PALETTE.len()]
            }
            SeriesStyle::Unserved => UNSERVED_COLOUR,
        }
    }

    pub fn marker(&self, style: &SeriesStyle) -> Marker {
        match style {
            SeriesStyle::Scenario(idx) | SeriesStyle::Plain(idx) => MARKERS[idx % MARKERS.len()],
            _ => Marker::Circle,
        }
    }
}
