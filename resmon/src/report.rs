//! Human-readable reservation report.
//!
//! Each reservation is printed as a block; the days-remaining line is coloured by its
//! [`SeverityTier`]. Colour is presentation only, the text is the same with it turned off.

use owo_colors::OwoColorize;
use std::fmt;
use std::io::{self, Write};

use crate::inventory::Reservation;

/// Display tier for a days-remaining value. First matching row wins:
///
/// | days      | tier     |
/// |-----------|----------|
/// | ≤ 0       | critical |
/// | 1 ..= 5   | severe   |
/// | 6 ..= 10  | warning  |
/// | 11 ..= 15 | caution  |
/// | 16 ..= 30 | notice   |
/// | > 30      | normal   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SeverityTier {
    Critical,
    Severe,
    Warning,
    Caution,
    Notice,
    Normal,
}

impl SeverityTier {
    pub fn for_days(days: i64) -> Self {
        match days {
            i64::MIN..=0 => SeverityTier::Critical,
            1..=5 => SeverityTier::Severe,
            6..=10 => SeverityTier::Warning,
            11..=15 => SeverityTier::Caution,
            16..=30 => SeverityTier::Notice,
            _ => SeverityTier::Normal,
        }
    }

    pub fn paint(&self, text: &str, color: bool) -> String {
        if !color {
            return text.to_string();
        }
        match self {
            SeverityTier::Critical => text.red().bold().to_string(),
            SeverityTier::Severe => text.red().to_string(),
            SeverityTier::Warning => text.magenta().to_string(),
            SeverityTier::Caution => text.yellow().to_string(),
            SeverityTier::Notice => text.cyan().to_string(),
            SeverityTier::Normal => text.green().to_string(),
        }
    }
}

impl fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SeverityTier::Critical => "critical",
            SeverityTier::Severe => "severe",
            SeverityTier::Warning => "warning",
            SeverityTier::Caution => "caution",
            SeverityTier::Notice => "notice",
            SeverityTier::Normal => "normal",
        };
        f.write_str(label)
    }
}

/// Which halves of the inventory to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFilter {
    All,
    ActiveOnly,
    ExpiredOnly,
}

impl ReportFilter {
    /// Both flags together are not rejected; they cancel out and everything is reported.
    pub fn from_flags(active_only: bool, expired_only: bool) -> Self {
        match (active_only, expired_only) {
            (true, false) => ReportFilter::ActiveOnly,
            (false, true) => ReportFilter::ExpiredOnly,
            _ => ReportFilter::All,
        }
    }

    /// Sections in print order. Active always comes first.
    pub fn sections(&self) -> &'static [Section] {
        match self {
            ReportFilter::All => &[Section::Active, Section::Expired],
            ReportFilter::ActiveOnly => &[Section::Active],
            ReportFilter::ExpiredOnly => &[Section::Expired],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Active,
    Expired,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Active => f.write_str("Active"),
            Section::Expired => f.write_str("Expired"),
        }
    }
}

/// Writes report sections to any sink (stdout in the binary, a buffer in tests).
pub struct ReportRenderer<W: Write> {
    out: W,
    color: bool,
}

impl<W: Write> ReportRenderer<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn section_header(&mut self, section: Section, count: usize) -> io::Result<()> {
        let title = format!("=== {section} reservations ({count}) ===");
        let title = if self.color { title.bold().to_string() } else { title };
        writeln!(self.out)?;
        writeln!(self.out, "{title}")
    }

    pub fn empty_section(&mut self, section: Section) -> io::Result<()> {
        let text = match section {
            Section::Active => "No active reservations.",
            Section::Expired => "No expired reservations.",
        };
        writeln!(self.out, "{text}")
    }

    pub fn reservation(&mut self, reservation: &Reservation, days_remaining: i64) -> io::Result<()> {
        let tier = SeverityTier::for_days(days_remaining);
        let start = reservation
            .effective_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());

        writeln!(self.out)?;
        if let Some(name) = &reservation.display_name {
            writeln!(self.out, "Reservation:    {name}")?;
        }
        writeln!(self.out, "ID:             {}", reservation.id)?;
        writeln!(self.out, "SKU:            {}", reservation.sku_name)?;
        writeln!(self.out, "Start date:     {start}")?;
        writeln!(self.out, "Expiry date:    {}", reservation.expiry_date.format("%Y-%m-%d"))?;
        writeln!(self.out, "Quantity:       {}", reservation.quantity)?;
        if let Some(state) = &reservation.provisioning_state {
            writeln!(self.out, "State:          {state}")?;
        }
        if let Some(term) = &reservation.term {
            writeln!(self.out, "Term:           {term}")?;
        }
        let days = tier.paint(&days_remaining.to_string(), self.color);
        writeln!(self.out, "Days remaining: {days}")
    }

    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
