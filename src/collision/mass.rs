use super::Solid;
use crate::project::CollisionSection;

/// Cubic inches to cubic meters.
pub const CUBIC_INCHES_TO_METERS: f32 = 1.6387064e-5;

/// Fallback density in kg/m³.
const DEFAULT_DENSITY: f32 = 2000.0;

const DENSITIES: &[(&str, f32)] = &[
    ("default", DEFAULT_DENSITY),
    ("metal", 2700.0),
    ("solidmetal", 2700.0),
    ("wood", 700.0),
    ("flesh", 900.0),
    ("plastic", 1050.0),
    ("rubber", 1100.0),
    ("glass", 2700.0),
    ("concrete", 2400.0),
    ("rock", 2600.0),
    ("dirt", 1600.0),
    ("ice", 917.0),
    ("cardboard", 500.0),
    ("paper", 800.0),
    ("water", 1000.0),
];

/// Density of a surface property, in kg/m³.
pub fn density_for(surface_prop: &str) -> f32 {
    DENSITIES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(surface_prop))
        .map(|(_, density)| *density)
        .unwrap_or(DEFAULT_DENSITY)
}

/// Total mass derived from solid sizes and material densities.
///
/// With a positive shell thickness the solids are treated as hollow shells
/// (area × thickness), otherwise as filled volumes.
pub(super) fn automass_total(solids: &[Solid], section: &CollisionSection) -> f32 {
    solids
        .iter()
        .map(|solid| {
            let density = section
                .density
                .unwrap_or_else(|| density_for(&solid.surface_prop));
            let cubic_inches = match section.thickness {
                Some(thickness) if thickness > 0.0 => solid.area * thickness,
                _ => solid.volume,
            };
            cubic_inches * CUBIC_INCHES_TO_METERS * density
        })
        .sum()
}

/// Shares `total_mass` between solids by biased volume. No solid weighs
/// less than one unit.
pub fn distribute_mass(solids: &mut [Solid], total_mass: f32) {
    let mut total_volume: f32 = solids
        .iter()
        .map(|solid| solid.volume * solid.mass_bias)
        .sum();
    if total_volume <= 0.0 {
        total_volume = 1.0;
    }
    for solid in solids {
        let share = solid.volume * solid.mass_bias / total_volume;
        solid.mass = (share * total_mass).max(1.0);
    }
}
