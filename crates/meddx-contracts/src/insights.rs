use std::fmt;
use std::str::FromStr;

/// Follow-up questions that can be asked about a diagnostic report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsightKind {
    Causes,
    Precautions,
    FutureMedications,
    Eli5,
    MedicationOverview,
}

impl InsightKind {
    pub const ALL: [InsightKind; 5] = [
        InsightKind::Causes,
        InsightKind::Precautions,
        InsightKind::FutureMedications,
        InsightKind::Eli5,
        InsightKind::MedicationOverview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Causes => "causes",
            Self::Precautions => "precautions",
            Self::FutureMedications => "future_medications",
            Self::Eli5 => "eli5",
            Self::MedicationOverview => "medication_overview",
        }
    }

    pub fn heading(self) -> &'static str {
        match self {
            Self::Causes => "Possible Causes",
            Self::Precautions => "Precautions",
            Self::FutureMedications => "Future Medications",
            Self::Eli5 => "Simplified Explanation",
            Self::MedicationOverview => "Medication Suggestions",
        }
    }

    pub fn busy_message(self) -> &'static str {
        match self {
            Self::Causes => "Fetching possible causes...",
            Self::Precautions => "Fetching precautions...",
            Self::FutureMedications => "Fetching future medications...",
            Self::Eli5 => "Generating simplified explanation...",
            Self::MedicationOverview => "Fetching medication suggestions...",
        }
    }

    /// Kind-specific instruction placed ahead of the report.
    pub fn instruction(self) -> &'static str {
        match self {
            Self::Causes => {
                "Based on the following diagnostic report, list the possible causes of the disease:"
            }
            Self::Precautions => {
                "Based on the following diagnostic report, list the recommended precautions:"
            }
            Self::FutureMedications => {
                "Based on the following diagnostic report, suggest possible future medications:"
            }
            Self::Eli5 => {
                "Explain the following diagnostic report in simple terms for a 5-year-old:"
            }
            Self::MedicationOverview => {
                "Based on the following diagnostic report, suggest a detailed list of possible medications including tablets, ointments, and other required medications that might help a doctor quickly analyze potential treatments. Include dosage recommendations if possible:"
            }
        }
    }

    /// The report is embedded verbatim after a blank line.
    pub fn prompt(self, report: &str) -> String {
        format!("{}\n\n{report}", self.instruction())
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown insight '{}' (expected one of: {})",
                    s.trim(),
                    Self::ALL
                        .iter()
                        .map(|kind| kind.as_str())
                        .collect::<Vec<&str>>()
                        .join(", ")
                )
            })
    }
}
