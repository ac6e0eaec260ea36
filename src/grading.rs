use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Letter grade on the fixed institutional scale, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "F")]
    F,
}

/// Inclusive lower bounds, evaluated highest first. Anything below the last
/// bound is an F.
const THRESHOLDS: [(f64, Grade); 5] = [
    (90.0, Grade::APlus),
    (80.0, Grade::A),
    (70.0, Grade::BPlus),
    (60.0, Grade::B),
    (50.0, Grade::C),
];

pub const MIN_MARKS: f64 = 0.0;
pub const MAX_MARKS: f64 = 100.0;

impl Grade {
    pub const ALL: [Grade; 6] = [
        Grade::APlus,
        Grade::A,
        Grade::BPlus,
        Grade::B,
        Grade::C,
        Grade::F,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::C => "C",
            Grade::F => "F",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Grade::ALL
            .into_iter()
            .find(|g| g.as_str() == s.trim())
            .ok_or_else(|| format!("unknown grade: {}", s))
    }
}

/// Map a score to its letter grade. Total over all f64 inputs: no range
/// checks are made here, and NaN falls through to F.
pub fn grade_for(marks: f64) -> Grade {
    for (bound, grade) in THRESHOLDS {
        if marks >= bound {
            return grade;
        }
    }
    Grade::F
}

/// Caller-side validation for marks entered by a teacher: finite and within
/// 0..=100.
pub fn validate_marks(marks: f64) -> Result<f64, String> {
    if !marks.is_finite() {
        return Err("marks must be a finite number".to_string());
    }
    if !(MIN_MARKS..=MAX_MARKS).contains(&marks) {
        return Err(format!(
            "marks must be between {} and {}",
            MIN_MARKS, MAX_MARKS
        ));
    }
    Ok(marks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_round_up_to_higher_grade() {
        let cases = [
            (90.0, Grade::APlus),
            (89.9, Grade::A),
            (89.999, Grade::A),
            (80.0, Grade::A),
            (79.9, Grade::BPlus),
            (70.0, Grade::BPlus),
            (69.9, Grade::B),
            (60.0, Grade::B),
            (59.9, Grade::C),
            (50.0, Grade::C),
            (49.9, Grade::F),
        ];
        for (marks, expected) in cases {
            assert_eq!(grade_for(marks), expected, "marks={}", marks);
        }
    }

    #[test]
    fn grade_never_improves_as_marks_decrease() {
        let mut prev = grade_for(150.0);
        let mut m = 150.0;
        while m > -50.0 {
            let g = grade_for(m);
            assert!(Grade::ALL.contains(&g));
            // Later variants are worse grades.
            assert!(g >= prev, "grade improved at marks={}", m);
            prev = g;
            m -= 0.25;
        }
    }

    #[test]
    fn out_of_range_and_nan_are_still_graded() {
        assert_eq!(grade_for(120.0), Grade::APlus);
        assert_eq!(grade_for(-5.0), Grade::F);
        assert_eq!(grade_for(f64::NAN), Grade::F);
    }

    #[test]
    fn grade_strings_match_scale() {
        let labels: Vec<String> = Grade::ALL.iter().map(|g| g.to_string()).collect();
        assert_eq!(labels, vec!["A+", "A", "B+", "B", "C", "F"]);
        assert_eq!("B+".parse::<Grade>(), Ok(Grade::BPlus));
        assert!("E".parse::<Grade>().is_err());
        assert_eq!(
            serde_json::to_value(Grade::APlus).expect("serialize"),
            serde_json::json!("A+")
        );
    }

    #[test]
    fn validate_marks_rejects_out_of_range() {
        assert_eq!(validate_marks(0.0), Ok(0.0));
        assert_eq!(validate_marks(100.0), Ok(100.0));
        assert!(validate_marks(-0.5).is_err());
        assert!(validate_marks(100.5).is_err());
        assert!(validate_marks(f64::INFINITY).is_err());
        assert!(validate_marks(f64::NAN).is_err());
    }
}
