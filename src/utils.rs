pub fn to_wide(str: &str) -> Vec<u16> {
    str.encode_utf16().chain(std::iter::once(0)).collect()
}

pub fn to_c_bytes(str: &str) -> Vec<u8> {
    let mut bytes = str.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_strings_are_nul_terminated() {
        let wide = to_wide("abc");
        assert_eq!(wide, vec![b'a' as u16, b'b' as u16, b'c' as u16, 0]);
    }

    #[test]
    fn c_bytes_are_nul_terminated() {
        assert_eq!(to_c_bytes(""), vec![0]);
        assert_eq!(to_c_bytes("hi"), vec![b'h', b'i', 0]);
    }
}
