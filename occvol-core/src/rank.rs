//! Top-N day selection.

use crate::data::provider::VolumeRecord;

/// Category that carries the all-products daily total.
pub const OCC_TOTAL: &str = "OCC Total";

/// The `n` records with the highest `category` volume.
///
/// Ties go to the earlier date. Records without the category rank last.
pub fn top_n<'a>(records: &'a [VolumeRecord], category: &str, n: usize) -> Vec<&'a VolumeRecord> {
    let mut ranked: Vec<&VolumeRecord> = records.iter().collect();
    ranked.sort_by(|a, b| {
        b.get(category)
            .cmp(&a.get(category))
            .then_with(|| a.date.cmp(&b.date))
    });
    ranked.truncate(n);
    ranked
}
