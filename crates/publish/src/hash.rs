//! Content hashes matching what each remote stores, so unchanged files can be
//! recognized without transferring them.

use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Git's object id for a blob: SHA-1 over `blob <len>\0` followed by the
/// content.
pub fn git_blob_hash(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Static asset hash for the edge-compute target: SHA-256 over the account
/// id followed by the content, truncated to 32 hex characters.
pub fn asset_hash(account_id: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.update(content);
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(32);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // Values from `git hash-object`.
    #[rstest]
    #[case(b"", "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391")]
    #[case(b"hello\n", "ce013625030ba8dba906f756967f9e9ca394464a")]
    #[case(b"hello world", "95d09f2b10159347eece71399a7e2e907ea3df4f")]
    fn test_git_blob_hash(#[case] content: &[u8], #[case] expected: &str) {
        assert_eq!(git_blob_hash(content), expected);
    }

    #[test]
    fn test_asset_hash_depends_on_account() {
        let a = asset_hash("0123456789abcdef0123456789abcdef", b"body{}");
        let b = asset_hash("fedcba9876543210fedcba9876543210", b"body{}");
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        // Plain SHA-256 of the concatenation, truncated.
        let mut hasher = Sha256::new();
        hasher.update(b"0123456789abcdef0123456789abcdefbody{}");
        assert_eq!(a, hex::encode(hasher.finalize())[..32]);
    }
}
