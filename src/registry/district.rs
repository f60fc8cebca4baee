use std::sync::LazyLock;

use regex::Regex;

static SEOUL_DISTRICT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"서울특별시\s+(\S+구)").ok());

/// District (`…구`) named in a Seoul street address.
pub fn district_from_address(address: &str) -> Option<String> {
    let re = SEOUL_DISTRICT.as_ref()?;
    re.captures(address)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Reduce a district label to its last token ("서울특별시 강서구" -> "강서구").
pub fn normalize_district(name: &str) -> Option<String> {
    name.split_whitespace().last().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn district_is_read_from_address() {
        assert_eq!(district_from_address("서울특별시 강남구 테헤란로 1").as_deref(), Some("강남구"));
        assert_eq!(district_from_address("서울특별시  중구 세종대로 110").as_deref(), Some("중구"));
        assert_eq!(district_from_address("경기도 성남시 분당구"), None);
    }

    #[test]
    fn labels_normalize_to_last_token() {
        assert_eq!(normalize_district("서울특별시 강서구").as_deref(), Some("강서구"));
        assert_eq!(normalize_district(" 노원구 ").as_deref(), Some("노원구"));
        assert_eq!(normalize_district("   "), None);
    }
}
