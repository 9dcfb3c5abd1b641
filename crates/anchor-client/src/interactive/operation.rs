//! Operations a user can start with the anchor, each carrying its own typed
//! field set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::AnchorError;

/// Stellar amounts carry at most seven decimal places.
const MAX_AMOUNT_DECIMALS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Withdrawal,
    Deposit,
}

impl TransferKind {
    #[must_use]
    pub fn endpoint_path(self) -> &'static str {
        match self {
            TransferKind::Withdrawal => "/withdraw",
            TransferKind::Deposit => "/deposit",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            TransferKind::Withdrawal => "withdrawal",
            TransferKind::Deposit => "deposit",
        }
    }

    #[must_use]
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "withdrawal" | "withdraw" => Some(TransferKind::Withdrawal),
            "deposit" => Some(TransferKind::Deposit),
            _ => None,
        }
    }
}

/// Field metadata for form rendering and validation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub required: bool,
}

const RECIPIENT_NAME: FieldSpec = FieldSpec {
    name: "recipient_name",
    label: "Recipient full name",
    required: true,
};
const ID_NUMBER: FieldSpec = FieldSpec {
    name: "id_number",
    label: "Recipient ID number",
    required: true,
};
const PHONE_NUMBER: FieldSpec = FieldSpec {
    name: "phone_number",
    label: "Mobile phone number",
    required: true,
};
const OPERATOR: FieldSpec = FieldSpec {
    name: "operator",
    label: "Mobile operator",
    required: false,
};
const INVOICE_NUMBER: FieldSpec = FieldSpec {
    name: "invoice_number",
    label: "Invoice reference number",
    required: true,
};
const SERVICE_TYPE: FieldSpec = FieldSpec {
    name: "service_type",
    label: "Service type",
    required: false,
};
const RECEIPT_REFERENCE: FieldSpec = FieldSpec {
    name: "receipt_reference",
    label: "Receipt reference number",
    required: true,
};

/// Fieldless discriminant of [`WithdrawMethod`], used when the method is
/// chosen before its fields are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WithdrawMethodKind {
    CashOut,
    MobileTopUp,
    BillPayment,
    WalletTopUp,
    ReceiptPayment,
}

impl WithdrawMethodKind {
    pub const ALL: [WithdrawMethodKind; 5] = [
        WithdrawMethodKind::CashOut,
        WithdrawMethodKind::MobileTopUp,
        WithdrawMethodKind::BillPayment,
        WithdrawMethodKind::WalletTopUp,
        WithdrawMethodKind::ReceiptPayment,
    ];

    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            WithdrawMethodKind::CashOut => "cash_out",
            WithdrawMethodKind::MobileTopUp => "mobile_top_up",
            WithdrawMethodKind::BillPayment => "bill_payment",
            WithdrawMethodKind::WalletTopUp => "wallet_top_up",
            WithdrawMethodKind::ReceiptPayment => "receipt_payment",
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            WithdrawMethodKind::CashOut => "Cash withdrawal at a banking agent",
            WithdrawMethodKind::MobileTopUp => "Prepaid mobile airtime top-up",
            WithdrawMethodKind::BillPayment => "Utility or service bill payment",
            WithdrawMethodKind::WalletTopUp => "Mobile money wallet top-up",
            WithdrawMethodKind::ReceiptPayment => "Payment of a collection receipt",
        }
    }

    #[must_use]
    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            WithdrawMethodKind::CashOut => &[RECIPIENT_NAME, ID_NUMBER, PHONE_NUMBER],
            WithdrawMethodKind::MobileTopUp => &[PHONE_NUMBER, OPERATOR],
            WithdrawMethodKind::BillPayment => &[INVOICE_NUMBER, SERVICE_TYPE],
            WithdrawMethodKind::WalletTopUp => &[PHONE_NUMBER],
            WithdrawMethodKind::ReceiptPayment => &[RECEIPT_REFERENCE],
        }
    }

    #[must_use]
    pub fn from_type_name(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_name().eq_ignore_ascii_case(raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawMethod {
    CashOut {
        recipient_name: String,
        id_number: String,
        phone_number: String,
    },
    MobileTopUp {
        phone_number: String,
        operator: Option<String>,
    },
    BillPayment {
        invoice_number: String,
        service_type: Option<String>,
    },
    WalletTopUp {
        phone_number: String,
    },
    ReceiptPayment {
        receipt_reference: String,
    },
}

impl WithdrawMethod {
    /// Build a method from loosely keyed input (form state, CLI flags).
    /// Absent required fields become empty strings and are reported by
    /// validation, not here.
    pub fn build(kind: WithdrawMethodKind, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let required = |spec: FieldSpec| lookup(spec.name).unwrap_or_default();
        let optional = |spec: FieldSpec| lookup(spec.name).filter(|value| !value.trim().is_empty());
        match kind {
            WithdrawMethodKind::CashOut => WithdrawMethod::CashOut {
                recipient_name: required(RECIPIENT_NAME),
                id_number: required(ID_NUMBER),
                phone_number: required(PHONE_NUMBER),
            },
            WithdrawMethodKind::MobileTopUp => WithdrawMethod::MobileTopUp {
                phone_number: required(PHONE_NUMBER),
                operator: optional(OPERATOR),
            },
            WithdrawMethodKind::BillPayment => WithdrawMethod::BillPayment {
                invoice_number: required(INVOICE_NUMBER),
                service_type: optional(SERVICE_TYPE),
            },
            WithdrawMethodKind::WalletTopUp => WithdrawMethod::WalletTopUp {
                phone_number: required(PHONE_NUMBER),
            },
            WithdrawMethodKind::ReceiptPayment => WithdrawMethod::ReceiptPayment {
                receipt_reference: required(RECEIPT_REFERENCE),
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> WithdrawMethodKind {
        match self {
            WithdrawMethod::CashOut { .. } => WithdrawMethodKind::CashOut,
            WithdrawMethod::MobileTopUp { .. } => WithdrawMethodKind::MobileTopUp,
            WithdrawMethod::BillPayment { .. } => WithdrawMethodKind::BillPayment,
            WithdrawMethod::WalletTopUp { .. } => WithdrawMethodKind::WalletTopUp,
            WithdrawMethod::ReceiptPayment { .. } => WithdrawMethodKind::ReceiptPayment,
        }
    }

    fn values(&self) -> Vec<(FieldSpec, Option<&str>)> {
        match self {
            WithdrawMethod::CashOut {
                recipient_name,
                id_number,
                phone_number,
            } => vec![
                (RECIPIENT_NAME, Some(recipient_name.as_str())),
                (ID_NUMBER, Some(id_number.as_str())),
                (PHONE_NUMBER, Some(phone_number.as_str())),
            ],
            WithdrawMethod::MobileTopUp {
                phone_number,
                operator,
            } => vec![
                (PHONE_NUMBER, Some(phone_number.as_str())),
                (OPERATOR, operator.as_deref()),
            ],
            WithdrawMethod::BillPayment {
                invoice_number,
                service_type,
            } => vec![
                (INVOICE_NUMBER, Some(invoice_number.as_str())),
                (SERVICE_TYPE, service_type.as_deref()),
            ],
            WithdrawMethod::WalletTopUp { phone_number } => {
                vec![(PHONE_NUMBER, Some(phone_number.as_str()))]
            }
            WithdrawMethod::ReceiptPayment { receipt_reference } => {
                vec![(RECEIPT_REFERENCE, Some(receipt_reference.as_str()))]
            }
        }
    }

    /// Labels of required fields that are blank.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.values()
            .into_iter()
            .filter(|(spec, value)| spec.required && value.is_none_or(|value| value.trim().is_empty()))
            .map(|(spec, _)| spec.label)
            .collect()
    }

    /// Non-blank field values keyed by wire name, trimmed.
    #[must_use]
    pub fn wire_fields(&self) -> BTreeMap<&'static str, String> {
        self.values()
            .into_iter()
            .filter_map(|(spec, value)| {
                let value = value?.trim();
                (!value.is_empty()).then(|| (spec.name, value.to_string()))
            })
            .collect()
    }
}

/// A transfer the user wants the anchor to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOperation {
    Withdraw {
        amount: String,
        method: WithdrawMethod,
    },
    Deposit {
        amount: String,
    },
}

impl TransferOperation {
    #[must_use]
    pub fn kind(&self) -> TransferKind {
        match self {
            TransferOperation::Withdraw { .. } => TransferKind::Withdrawal,
            TransferOperation::Deposit { .. } => TransferKind::Deposit,
        }
    }

    #[must_use]
    pub fn amount(&self) -> &str {
        match self {
            TransferOperation::Withdraw { amount, .. } | TransferOperation::Deposit { amount } => {
                amount.trim()
            }
        }
    }

    /// Check everything the anchor needs before any request is sent.
    pub fn validate(&self, account_key: &str) -> Result<(), AnchorError> {
        let mut missing: Vec<String> = Vec::new();
        if account_key.trim().is_empty() {
            missing.push("Account".to_string());
        }
        if !is_valid_amount(self.amount()) {
            missing.push("Amount".to_string());
        }
        if let TransferOperation::Withdraw { method, .. } = self {
            missing.extend(method.missing_fields().into_iter().map(str::to_string));
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AnchorError::DataValidationError { missing })
        }
    }

    #[must_use]
    pub fn initiation_request(
        &self,
        asset_code: &str,
        account_key: &str,
        callback: &str,
    ) -> InitiationRequest {
        let (method_type, fields) = match self {
            TransferOperation::Withdraw { method, .. } => {
                (Some(method.kind().type_name()), method.wire_fields())
            }
            TransferOperation::Deposit { .. } => (None, BTreeMap::new()),
        };
        InitiationRequest {
            asset_code: asset_code.to_string(),
            account: account_key.trim().to_string(),
            method_type,
            amount: self.amount().to_string(),
            callback: callback.to_string(),
            fields,
        }
    }
}

/// Body of the interactive initiation POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitiationRequest {
    pub asset_code: String,
    pub account: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub method_type: Option<&'static str>,
    pub amount: String,
    pub callback: String,
    #[serde(flatten)]
    pub fields: BTreeMap<&'static str, String>,
}

/// Positive decimal with at most seven fractional digits.
#[must_use]
pub fn is_valid_amount(raw: &str) -> bool {
    let raw = raw.trim();
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if whole.is_empty() && fraction.is_empty() {
        return false;
    }
    if !whole.chars().all(|ch| ch.is_ascii_digit())
        || !fraction.chars().all(|ch| ch.is_ascii_digit())
        || fraction.len() > MAX_AMOUNT_DECIMALS
    {
        return false;
    }
    whole.chars().chain(fraction.chars()).any(|ch| ch != '0')
}
