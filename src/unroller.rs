//! Expand repeats and navigation jumps into a linear play order.
//!
//! The parser pre-scans every `<measure>` of a part into [`MeasureMarks`]
//! and then runs its state machine over the measures in the order returned
//! by [`play_order`], so tick positions keep increasing through repeats.
//!
//! Handles:
//! - Forward / backward repeat barlines
//! - Volta brackets (1st / 2nd / Nth endings)
//! - D.S. (dal segno) and D.C. (da capo)
//! - Fine, which stops the walk once a D.S./D.C. jump has been taken
//! - To Coda / Coda
//! - Repeats are not taken again after a D.S./D.C. jump

use std::collections::HashMap;

/// A volta bracket boundary on one barline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndingMark {
    /// Passes this ending is played on
    pub numbers: Vec<i32>,
    /// `true` for `type="start"`, `false` for stop/discontinue
    pub start: bool,
}

/// Navigation marks of one written measure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasureMarks {
    pub forward_repeat: bool,
    pub backward_repeat: bool,
    pub endings: Vec<EndingMark>,
    pub segno: bool,
    pub coda: bool,
    pub dacapo: bool,
    pub dalsegno: bool,
    pub fine: bool,
    pub tocoda: bool,
}

/// Walk the measures following repeats and jumps, returning written
/// measure indices in play order.
pub fn play_order(measures: &[MeasureMarks]) -> Vec<usize> {
    if measures.is_empty() {
        return Vec::new();
    }

    // ── Pre-scan: locate segno, coda markers ────────────────────────
    let segno_index = measures.iter().rposition(|m| m.segno);
    let coda_index = measures.iter().rposition(|m| m.coda);

    // ── Pre-scan: build volta map (measure index → ending numbers) ──
    let mut volta_map: HashMap<usize, Vec<i32>> = HashMap::new();
    let mut current_ending: Option<Vec<i32>> = None;
    for (i, m) in measures.iter().enumerate() {
        for ending in &m.endings {
            if ending.start {
                current_ending = Some(ending.numbers.clone());
                volta_map.insert(i, ending.numbers.clone());
            } else {
                if let Some(nums) = &current_ending {
                    volta_map.entry(i).or_insert_with(|| nums.clone());
                }
                current_ending = None;
            }
        }
        if let Some(nums) = &current_ending {
            volta_map.entry(i).or_insert_with(|| nums.clone());
        }
    }

    // ── Pre-scan: passes per repeat section ─────────────────────────
    // The highest ending number in a section is how many passes it takes.
    let mut section_max_passes: HashMap<usize, i32> = HashMap::new();
    let mut current_forward = 0;
    for (i, m) in measures.iter().enumerate() {
        if m.forward_repeat {
            current_forward = i;
        }
        if let Some(nums) = volta_map.get(&i) {
            let entry = section_max_passes.entry(current_forward).or_insert(2);
            for &n in nums {
                *entry = (*entry).max(n);
            }
        }
    }

    // ── Walk: expand into play order ────────────────────────────────
    let mut result = Vec::new();
    let mut pos = 0;
    let mut repeat_start = 0;
    let mut repeat_pass = 1;
    let mut jump_taken = false;
    let max_iterations = measures.len() * 50;
    let mut iterations = 0;

    while pos < measures.len() {
        iterations += 1;
        if iterations > max_iterations {
            log::warn!(
                "repeat expansion hit its safety limit ({} iterations); play order truncated at {} of {} written measures",
                max_iterations,
                result.len(),
                measures.len()
            );
            break;
        }

        let m = &measures[pos];

        // Only the first encounter of a forward repeat moves the start.
        if m.forward_repeat && repeat_pass == 1 {
            repeat_start = pos;
        }

        if let Some(nums) = volta_map.get(&pos) {
            if !nums.contains(&repeat_pass) {
                pos += 1;
                continue;
            }
        }

        if jump_taken && m.fine {
            result.push(pos);
            break;
        }

        if jump_taken && m.tocoda {
            if let Some(coda) = coda_index {
                pos = coda;
                jump_taken = false;
                continue;
            }
        }

        result.push(pos);

        if !jump_taken && m.backward_repeat {
            let max_pass = section_max_passes.get(&repeat_start).copied().unwrap_or(2);
            if repeat_pass < max_pass {
                repeat_pass += 1;
                pos = repeat_start;
                continue;
            }
        }

        if !jump_taken {
            if m.dalsegno {
                if let Some(segno) = segno_index {
                    pos = segno;
                    jump_taken = true;
                    repeat_pass = 1;
                    continue;
                }
            }
            if m.dacapo {
                pos = 0;
                jump_taken = true;
                repeat_pass = 1;
                continue;
            }
        }

        pos += 1;
        // Past the last volta of a section: later backward repeats without
        // a forward repeat return here, not to the previous section.
        if repeat_pass > 1 && m.backward_repeat && !volta_map.contains_key(&pos) {
            repeat_pass = 1;
            repeat_start = pos;
        }
    }

    result
}

/// Parse ending numbers like "1", "1, 2" or "1-3" into pass numbers.
pub fn parse_ending_numbers(s: &str) -> Vec<i32> {
    let mut result = Vec::new();
    for part in s.split(|c: char| c == ',' || c == ' ') {
        let part = part.trim().trim_end_matches('.');
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<i32>(), end.parse::<i32>()) {
                result.extend(start..=end);
                continue;
            }
        }
        if let Ok(n) = part.parse::<i32>() {
            result.push(n);
        }
    }
    // Unreadable numbering still plays on the first pass.
    if result.is_empty() && !s.trim().is_empty() {
        result.push(1);
    }
    result
}

/// Whether direction text marks a Fine, excluding "D.C. al Fine" and
/// "D.S. al Fine" which are jump instructions.
pub fn words_mark_fine(words: &str) -> bool {
    let lower = words.to_lowercase();
    lower.contains("fine") && !lower.contains("d.s.") && !lower.contains("d.c.")
}
