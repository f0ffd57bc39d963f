use crate::config::{LayoutConfig, ScanConfig};
use crate::filters::Size;
use crate::models::{BoundingBox, CandidateKind};

/// Fixed glyph cells of one slot on the canonical card.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotLayout {
    pub kind: CandidateKind,
    /// Left edge of every glyph cell, separators included.
    pub cells: Vec<u32>,
    /// Indices into `cells` that hold digits.
    pub digit_cells: Vec<usize>,
    pub top: u32,
    pub glyph_width: u32,
    pub glyph_height: u32,
    /// Index of this slot's first digit in the full card number.
    pub first_position: usize,
}

impl SlotLayout {
    pub fn nominal_box(&self) -> BoundingBox {
        let left = self.cells.first().copied().unwrap_or(0);
        let right = self.cells.last().copied().unwrap_or(0) + self.glyph_width;
        BoundingBox {
            x: left,
            y: self.top,
            width: right - left,
            height: self.glyph_height,
        }
    }

    pub fn digit_count(&self) -> usize {
        self.digit_cells.len()
    }
}

/// Where glyphs sit on the canonical card.
#[derive(Debug, Clone, PartialEq)]
pub struct CardLayout {
    pub canonical: Size,
    pub number_slots: Vec<SlotLayout>,
    pub expiry_slot: SlotLayout,
}

impl CardLayout {
    pub fn from_config(config: &ScanConfig) -> Self {
        let canonical = Size::new(config.canonical.width, config.canonical.height);
        let l = &config.layout;

        let mut number_slots = Vec::with_capacity(l.groups.len());
        let mut position = 0;
        for (group, &len) in l.groups.iter().enumerate() {
            let cells: Vec<u32> = (0..len).map(|j| number_cell_x(l, group, position + j)).collect();
            number_slots.push(SlotLayout {
                kind: CandidateKind::NumberGroup(group),
                digit_cells: (0..len).collect(),
                cells,
                top: l.number_top,
                glyph_width: l.glyph_width,
                glyph_height: l.glyph_height,
                first_position: position,
            });
            position += len;
        }

        let e = &l.expiry;
        let expiry_slot = SlotLayout {
            kind: CandidateKind::Expiry,
            cells: (0..5).map(|i| e.left + i * e.glyph_pitch).collect(),
            // "MM/YY": cell 2 is the separator.
            digit_cells: vec![0, 1, 3, 4],
            top: e.top,
            glyph_width: e.glyph_width,
            glyph_height: e.glyph_height,
            first_position: 0,
        };

        Self {
            canonical,
            number_slots,
            expiry_slot,
        }
    }

    pub fn digit_count(&self) -> usize {
        self.number_slots.iter().map(SlotLayout::digit_count).sum()
    }

    pub fn slot(&self, kind: CandidateKind) -> Option<&SlotLayout> {
        match kind {
            CandidateKind::NumberGroup(g) => self.number_slots.get(g),
            CandidateKind::Expiry => Some(&self.expiry_slot),
        }
    }
}

/// Left edge of the glyph at `position` on the number line.
pub(crate) fn number_cell_x(layout: &LayoutConfig, group: usize, position: usize) -> u32 {
    layout.number_left + position as u32 * layout.glyph_pitch + group as u32 * layout.group_gap
}
