use std::io::Write;
use std::sync::Mutex;

use anyhow::{Context, Result};
use fxhash::FxHashMap;
use log::debug;

use crate::caller::raw_variant::{VariantState, VariantType};
use crate::caller::variant_call::VariantCall;
use crate::core::window::Window;

/**
 * Thread-safe store of fully evidenced variant calls keyed by variant id.
 * Workers merge their window results in; the main thread flushes calls in
 * genome order once every window that could still produce them is done.
 */
#[derive(Default)]
pub struct VariantStore {
    data: Mutex<FxHashMap<u64, VariantCall>>,
}

impl VariantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_variants(&self, variants: Vec<VariantCall>) {
        if variants.is_empty() {
            return;
        }

        let mut data = self.data.lock().expect("variant store lock");
        for curr in variants {
            let identifier = curr.identifier();
            match data.get(&identifier) {
                None => {
                    data.insert(identifier, curr);
                }
                Some(prev) => {
                    // overlapping windows can call the same variant twice;
                    // keep the better evidenced copy. Ties fall back to the
                    // record text so the winner never depends on which
                    // worker finished first
                    let prev_rank = (prev.total_coverage(), prev.quality());
                    let curr_rank = (curr.total_coverage(), curr.quality());
                    let replace = curr_rank > prev_rank
                        || (curr_rank == prev_rank && curr.as_vcf_record() > prev.as_vcf_record());
                    if replace {
                        data.insert(identifier, curr);
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().expect("variant store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move out and print every call strictly before the window.
    pub fn flush_before_window(&self, window: &Window, out: &mut dyn Write) -> Result<usize> {
        let mut data = self.data.lock().expect("variant store lock");
        let keys: Vec<u64> = data
            .iter()
            .filter(|(_, call)| {
                if call.chrom_index() != window.chrom_index() {
                    call.chrom_index() < window.chrom_index()
                } else {
                    (call.start_pos1() as u64) < window.end_pos1()
                }
            })
            .map(|(key, _)| *key)
            .collect();

        Self::extract_and_dump(&mut data, &keys, out)
    }

    /// Final drain of the store.
    pub fn flush_all(&self, out: &mut dyn Write) -> Result<usize> {
        let mut data = self.data.lock().expect("variant store lock");
        let keys: Vec<u64> = data.keys().copied().collect();
        Self::extract_and_dump(&mut data, &keys, out)
    }

    fn extract_and_dump(data: &mut FxHashMap<u64, VariantCall>, keys: &[u64], out: &mut dyn Write) -> Result<usize> {
        let mut variants: Vec<VariantCall> = Vec::with_capacity(keys.len());
        for key in keys {
            let call = match data.remove(key) {
                Some(call) => call,
                None => continue,
            };

            // calls without support never reach the output
            if call.state() == VariantState::None || call.category() == VariantType::Ref {
                continue;
            }
            variants.push(call);
        }

        variants.sort_by(|lhs, rhs| lhs.sort_key().cmp(&rhs.sort_key()));
        for call in &variants {
            writeln!(out, "{}", call.as_vcf_record()).context("could not write VCF record")?;
        }

        if !variants.is_empty() {
            out.flush().context("could not flush output VCF stream")?;
            debug!("Flushed {} variant(s) from VariantStore to output VCF file", variants.len());
        }

        Ok(variants.len())
    }
}
