//! Subject-name generation for bulk certificates.
//!
//! The common name of certificate `index` (task-wide, 0-based) is derived
//! from the task's [`CertInfo`]:
//!
//! | Generator   | Common name                                 |
//! |-------------|---------------------------------------------|
//! | `static`    | `prefix + commonName`                       |
//! | `increment` | `prefix + UPPERCASE_HEX(commonNameStart + index)` |
//! | `list`      | `prefix + commonNameList[index]`            |
//!
//! The remaining subject attributes are copied verbatim from the template.

use rcgen::{DistinguishedName, DnType};

use crate::domain::{CertInfo, NameGenerator};
use crate::error::{BulkError, BulkResult};

/// Produces subjects for certificates of one task.
///
/// # Examples
///
/// ```
/// use bulkcert::domain::{CertInfo, NameGenerator};
/// use bulkcert::subject::SubjectGenerator;
///
/// let info = CertInfo {
///     common_name_prefix: Some("sensor-".to_string()),
///     common_name_generator: NameGenerator::Increment,
///     common_name_start: Some("A".to_string()),
///     ..CertInfo::default()
/// };
/// let generator = SubjectGenerator::new(&info).unwrap();
/// assert_eq!(generator.common_name(5).unwrap(), "sensor-F");
/// assert_eq!(generator.common_name(6).unwrap(), "sensor-10");
/// ```
#[derive(Debug, Clone)]
pub struct SubjectGenerator<'a> {
    info: &'a CertInfo,
    start: u128,
}

impl<'a> SubjectGenerator<'a> {
    /// Validates the template's generator-specific fields.
    ///
    /// # Errors
    ///
    /// [`BulkError::Validation`] when the static name is empty, the
    /// increment start is missing or not hex, or the list is missing/empty.
    pub fn new(info: &'a CertInfo) -> BulkResult<Self> {
        let start = match info.common_name_generator {
            NameGenerator::Static => {
                let name_len = info.common_name.as_deref().map_or(0, str::len)
                    + info.common_name_prefix.as_deref().map_or(0, str::len);
                if name_len == 0 {
                    return Err(BulkError::validation(
                        "static generator requires commonName or commonNamePrefix",
                    ));
                }
                0
            },
            NameGenerator::Increment => {
                let raw = info.common_name_start.as_deref().ok_or_else(|| {
                    BulkError::validation("increment generator requires commonNameStart")
                })?;
                parse_hex(raw)?
            },
            NameGenerator::List => {
                if info.common_name_list.as_ref().is_none_or(Vec::is_empty) {
                    return Err(BulkError::validation(
                        "list generator requires a non-empty commonNameList",
                    ));
                }
                0
            },
        };
        Ok(Self { info, start })
    }

    /// Checks that the template can name `total` certificates.
    ///
    /// Only the list generator is bounded.
    pub fn ensure_capacity(&self, total: u64) -> BulkResult<()> {
        if let (NameGenerator::List, Some(list)) = (
            self.info.common_name_generator,
            self.info.common_name_list.as_ref(),
        ) {
            if (list.len() as u64) < total {
                return Err(BulkError::validation(format!(
                    "commonNameList has {} names but {total} certificates were requested",
                    list.len()
                )));
            }
        }
        if self.info.common_name_generator == NameGenerator::Increment
            && total > 0
            && self.start.checked_add(u128::from(total - 1)).is_none()
        {
            return Err(BulkError::validation("commonNameStart overflows"));
        }
        Ok(())
    }

    /// Common name of certificate `index`.
    pub fn common_name(&self, index: u64) -> BulkResult<String> {
        let prefix = self.info.common_name_prefix.as_deref().unwrap_or_default();
        let suffix = match self.info.common_name_generator {
            NameGenerator::Static => self.info.common_name.clone().unwrap_or_default(),
            NameGenerator::Increment => {
                let value = self
                    .start
                    .checked_add(u128::from(index))
                    .ok_or_else(|| BulkError::validation("commonNameStart overflows"))?;
                format!("{value:X}")
            },
            NameGenerator::List => {
                let list = self.info.common_name_list.as_deref().unwrap_or_default();
                usize::try_from(index)
                    .ok()
                    .and_then(|i| list.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        BulkError::validation(format!(
                            "commonNameList has no entry for certificate {index}"
                        ))
                    })?
            },
        };
        Ok(format!("{prefix}{suffix}"))
    }

    /// Full subject of certificate `index`.
    pub fn distinguished_name(&self, index: u64) -> BulkResult<(String, DistinguishedName)> {
        let common_name = self.common_name(index)?;
        let mut dn = DistinguishedName::new();
        let attributes = [
            (DnType::CountryName, &self.info.country),
            (DnType::StateOrProvinceName, &self.info.state),
            (DnType::LocalityName, &self.info.locality),
            (DnType::OrganizationName, &self.info.organization),
            (DnType::OrganizationalUnitName, &self.info.organizational_unit),
        ];
        for (kind, value) in attributes {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                dn.push(kind, value);
            }
        }
        dn.push(DnType::CommonName, common_name.as_str());
        Ok((common_name, dn))
    }
}

fn parse_hex(raw: &str) -> BulkResult<u128> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u128::from_str_radix(digits, 16).map_err(|_| {
        BulkError::validation(format!("commonNameStart is not a hex number: {raw}"))
    })
}
