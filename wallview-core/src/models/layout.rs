use serde::{Deserialize, Serialize};

use super::id::WindowIndex;

/// Total number of windows every display grid owns, across all pages.
pub const MAX_WINDOWS: usize = 64;

/// Grid arrangement of one page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LayoutType {
    #[serde(rename = "1x1")]
    OneByOne,
    #[default]
    #[serde(rename = "2x2")]
    TwoByTwo,
    #[serde(rename = "1+5")]
    OnePlusFive,
    #[serde(rename = "1+7")]
    OnePlusSeven,
    #[serde(rename = "3x3")]
    ThreeByThree,
    #[serde(rename = "4x4")]
    FourByFour,
    #[serde(rename = "5x5")]
    FiveByFive,
    #[serde(rename = "6x6")]
    SixBySix,
    #[serde(rename = "8x8")]
    EightByEight,
}

/// Inclusive window range shown by one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBounds {
    pub first: WindowIndex,
    pub last: WindowIndex,
}

impl PageBounds {
    #[must_use]
    pub const fn contains(&self, window: WindowIndex) -> bool {
        window >= self.first && window <= self.last
    }

    pub fn windows(&self) -> std::ops::RangeInclusive<WindowIndex> {
        self.first..=self.last
    }
}

impl LayoutType {
    pub const ALL: [Self; 9] = [
        Self::OneByOne,
        Self::TwoByTwo,
        Self::OnePlusFive,
        Self::OnePlusSeven,
        Self::ThreeByThree,
        Self::FourByFour,
        Self::FiveByFive,
        Self::SixBySix,
        Self::EightByEight,
    ];

    #[must_use]
    pub const fn windows_per_page(self) -> usize {
        match self {
            Self::OneByOne => 1,
            Self::TwoByTwo => 4,
            Self::OnePlusFive => 6,
            Self::OnePlusSeven => 8,
            Self::ThreeByThree => 9,
            Self::FourByFour => 16,
            Self::FiveByFive => 25,
            Self::SixBySix => 36,
            Self::EightByEight => 64,
        }
    }

    #[must_use]
    pub const fn page_count(self) -> usize {
        MAX_WINDOWS.div_ceil(self.windows_per_page())
    }

    /// First and last window of `page`, clamped to the grid capacity.
    ///
    /// Pages past the end are clamped to the last page.
    #[must_use]
    pub fn page_bounds(self, page: usize) -> PageBounds {
        let per_page = self.windows_per_page();
        let page = page.min(self.page_count() - 1);
        let first = page * per_page;
        let last = (first + per_page - 1).min(MAX_WINDOWS - 1);
        PageBounds { first, last }
    }

    #[must_use]
    pub const fn page_of(self, window: WindowIndex) -> usize {
        window / self.windows_per_page()
    }

    /// Wrap a signed page offset around the page count
    #[must_use]
    pub fn offset_page(self, page: usize, offset: i64) -> usize {
        let count = self.page_count() as i64;
        (page as i64 + offset).rem_euclid(count) as usize
    }
}

impl std::fmt::Display for LayoutType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OneByOne => "1x1",
            Self::TwoByTwo => "2x2",
            Self::OnePlusFive => "1+5",
            Self::OnePlusSeven => "1+7",
            Self::ThreeByThree => "3x3",
            Self::FourByFour => "4x4",
            Self::FiveByFive => "5x5",
            Self::SixBySix => "6x6",
            Self::EightByEight => "8x8",
        };
        f.write_str(name)
    }
}
