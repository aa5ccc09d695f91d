//! Trial metadata: what is being run, on whom, and where its files go.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{GsacError, GsacResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrialType {
    Vas,
    Vickrey,
    Jnd,
    Pref,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    /// Walking without the boots.
    Nat,
    /// Boots on, zero torque.
    Zt,
    Low,
    Med,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Description {
    Fam,
    Pre,
    Main,
    Post,
}

const ALL_CONDITIONS: &[Condition] = &[
    Condition::Nat,
    Condition::Zt,
    Condition::Low,
    Condition::Med,
    Condition::High,
];
const POWERED: &[Condition] = &[Condition::Low, Condition::Med, Condition::High];
const ALL_DESCRIPTIONS: &[Description] = &[
    Description::Fam,
    Description::Pre,
    Description::Main,
    Description::Post,
];
const NO_FAM: &[Description] = &[Description::Pre, Description::Main, Description::Post];

/// Closed table of valid (type, conditions, descriptions) combinations.
pub const TRIAL_TABLE: &[(TrialType, &[Condition], &[Description])] = &[
    (TrialType::Vas, ALL_CONDITIONS, ALL_DESCRIPTIONS),
    (TrialType::Vickrey, ALL_CONDITIONS, ALL_DESCRIPTIONS),
    (TrialType::Jnd, POWERED, NO_FAM),
    (TrialType::Pref, POWERED, NO_FAM),
];

macro_rules! named_enum {
    ($ty:ident, $what:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = GsacError;

            fn from_str(s: &str) -> GsacResult<Self> {
                let upper = s.trim().to_ascii_uppercase();
                $ty::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == upper)
                    .ok_or_else(|| {
                        let names: Vec<&str> = $ty::ALL.iter().map(|v| v.as_str()).collect();
                        GsacError::Configuration(format!(
                            "unknown {} '{}' (expected one of {})",
                            $what,
                            s,
                            names.join("|")
                        ))
                    })
            }
        }
    };
}

named_enum!(TrialType, "trial type", { Vas => "VAS", Vickrey => "VICKREY", Jnd => "JND", Pref => "PREF" });
named_enum!(Condition, "condition", { Nat => "NAT", Zt => "ZT", Low => "LOW", Med => "MED", High => "HIGH" });
named_enum!(Description, "description", { Fam => "FAM", Pre => "PRE", Main => "MAIN", Post => "POST" });

impl TrialType {
    /// Conditions and descriptions this trial type may be run with.
    pub fn table_row(&self) -> (&'static [Condition], &'static [Description]) {
        TRIAL_TABLE
            .iter()
            .find(|(t, _, _)| t == self)
            .map(|(_, c, d)| (*c, *d))
            .unwrap_or((&[], &[]))
    }
}

fn describe_table() -> String {
    TRIAL_TABLE
        .iter()
        .map(|(t, conds, descs)| {
            let c: Vec<&str> = conds.iter().map(|c| c.as_str()).collect();
            let d: Vec<&str> = descs.iter().map(|d| d.as_str()).collect();
            format!("{} [{}] [{}]", t, c.join("|"), d.join("|"))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialSpec {
    pub subject: String,
    pub trial_type: TrialType,
    pub condition: Condition,
    pub description: Description,
}

impl TrialSpec {
    pub fn new(
        subject: &str,
        trial_type: TrialType,
        condition: Condition,
        description: Description,
    ) -> GsacResult<Self> {
        validate_subject(subject)?;
        let (conds, descs) = trial_type.table_row();
        if !conds.contains(&condition) || !descs.contains(&description) {
            return Err(GsacError::Configuration(format!(
                "{} {} {} is not in TRIAL_TABLE: {}",
                trial_type,
                condition,
                description,
                describe_table()
            )));
        }
        Ok(Self {
            subject: subject.to_string(),
            trial_type,
            condition,
            description,
        })
    }

    /// Parse raw CLI strings.
    pub fn parse(subject: &str, trial_type: &str, condition: &str, description: &str) -> GsacResult<Self> {
        Self::new(subject, trial_type.parse()?, condition.parse()?, description.parse()?)
    }

    /// `<subject>_<TYPE>_<COND>_<DESC>_<YYYYmmdd_HHMMSS>`
    pub fn file_stem<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> String
    where
        Tz::Offset: fmt::Display,
    {
        format!(
            "{}_{}_{}_{}_{}",
            self.subject,
            self.trial_type,
            self.condition,
            self.description,
            now.format("%Y%m%d_%H%M%S")
        )
    }

    /// `<root>/<subject>/<TYPE>/`
    pub fn trial_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.subject).join(self.trial_type.as_str())
    }

    /// Create the trial directory and return it.
    pub fn ensure_trial_dir(&self, root: &Path) -> GsacResult<PathBuf> {
        let dir = self.trial_dir(root);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn validate_subject(subject: &str) -> GsacResult<()> {
    if subject.is_empty() {
        return Err(GsacError::Configuration("subject id is empty".into()));
    }
    if let Some(bad) = subject
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(GsacError::Configuration(format!(
            "subject id '{}' contains '{}'; use letters, digits, '_' or '-'",
            subject, bad
        )));
    }
    Ok(())
}
