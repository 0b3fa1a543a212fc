use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::PlanType;
use crate::{Amount, Operation};

/// Errors that can occur when parsing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },

    #[error("line {line}: invalid {field} '{value}'")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    phone: Option<String>,
    username: Option<String>,
    password: Option<String>,
    /// Referrer's invite code (register) or plan type (plan).
    code: Option<String>,
    /// Explicit invite code for the new account.
    invite: Option<String>,
    plan: Option<String>,
    amount: Option<f64>,
    daily: Option<f64>,
    date: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    phone: String,
    username: String,
    balance: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl InputRow {
    fn require(
        field: Option<String>,
        line: usize,
        op: &str,
        name: &'static str,
    ) -> Result<String, CsvError> {
        non_empty(field).ok_or(CsvError::MissingField {
            line,
            op: op.to_string(),
            field: name,
        })
    }

    fn require_amount(
        field: Option<f64>,
        line: usize,
        op: &str,
        name: &'static str,
    ) -> Result<Amount, CsvError> {
        field.map(Amount::from_float).ok_or(CsvError::MissingField {
            line,
            op: op.to_string(),
            field: name,
        })
    }

    fn into_operation(self, line: usize) -> Result<Operation, CsvError> {
        match self.op.as_str() {
            "register" => Ok(Operation::Register {
                phone: Self::require(self.phone, line, "register", "phone")?,
                username: Self::require(self.username, line, "register", "username")?,
                password: Self::require(self.password, line, "register", "password")?,
                referred_by: non_empty(self.code),
                invite_code: non_empty(self.invite),
            }),
            "recharge" => Ok(Operation::Recharge {
                phone: Self::require(self.phone, line, "recharge", "phone")?,
                amount: Self::require_amount(self.amount, line, "recharge", "amount")?,
            }),
            "plan" => {
                let plan_type = match non_empty(self.code) {
                    Some(value) => value.parse::<PlanType>().map_err(|_| CsvError::InvalidField {
                        line,
                        field: "code",
                        value,
                    })?,
                    None => PlanType::PlanA,
                };
                Ok(Operation::CreatePlan {
                    name: Self::require(self.plan, line, "plan", "plan")?,
                    plan_type,
                    price: Self::require_amount(self.amount, line, "plan", "amount")?,
                    daily_income: Self::require_amount(self.daily, line, "plan", "daily")?,
                })
            }
            "buy" => Ok(Operation::BuyPlan {
                phone: Self::require(self.phone, line, "buy", "phone")?,
                plan: Self::require(self.plan, line, "buy", "plan")?,
            }),
            "withdraw" => Ok(Operation::Withdraw {
                phone: Self::require(self.phone, line, "withdraw", "phone")?,
                password: Self::require(self.password, line, "withdraw", "password")?,
                amount: Self::require_amount(self.amount, line, "withdraw", "amount")?,
            }),
            "daily" => {
                let date = match non_empty(self.date) {
                    Some(value) => Some(value.parse().map_err(|_| CsvError::InvalidField {
                        line,
                        field: "date",
                        value,
                    })?),
                    None => None,
                };
                Ok(Operation::CreditDaily { date })
            }
            other => Err(CsvError::UnrecognizedOp {
                line,
                op: other.to_string(),
            }),
        }
    }
}

/// Read operations from a csv file
pub fn read_operations(
    path: impl AsRef<Path>,
) -> impl Iterator<Item = Result<Operation, CsvError>> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .expect("failed to open csv file");

    reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_operation(line)
        })
}

/// write account balances to stdout in csv format
pub fn write_balances(balances: impl IntoIterator<Item = (String, String, Amount)>) {
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());

    for (phone, username, balance) in balances {
        let row = OutputRow {
            phone,
            username,
            balance: balance.to_string(),
        };
        writer.serialize(&row).expect("failed to write csv row");
    }

    writer.flush().expect("failed to flush csv writer");
}
