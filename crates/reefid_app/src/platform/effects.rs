use reefid_core::{DialogEffect, SpeciesData};
use reefid_engine::PendingItemStore;

use super::app::print_pending;

/// Carries out dialog effects on the terminal.
pub fn run_effects(effects: Vec<DialogEffect>, store: &PendingItemStore) {
    for effect in effects {
        match effect {
            DialogEffect::ShowDetails(species) => print_species(&species),
            DialogEffect::ShowPendingItems => print_pending(store, false),
            // The terminal has no dialog to close, and retries are explicit commands.
            DialogEffect::Close | DialogEffect::StartRetry => {}
        }
    }
}

fn print_species(species: &SpeciesData) {
    match &species.scientific_name {
        Some(name) => println!("  {} ({})", species.common_name, name),
        None => println!("  {}", species.common_name),
    }
    if let Some(confidence) = species.confidence {
        println!("  confidence: {:.0}%", confidence * 100.0);
    }
    if let Some(habitat) = &species.habitat {
        println!("  habitat:    {}", habitat);
    }
    if let Some(description) = &species.description {
        println!("  {}", description);
    }
}
