use std::{fs, path::Path};

use rand::RngCore;

use crate::error::Result;

// mongod accepts key files of 6 to 1024 base64 characters; 756 bytes
// encode to 1008.
const KEY_BYTES: usize = 756;

/// Write a random key file for intra-cluster authentication, readable
/// only by the owner.
pub fn create_key(path: &Path) -> Result<()> {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    fs::write(path, base64::encode(&bytes[..]))?;

    if cfg!(unix) {
        use std::{fs::Permissions, os::unix::fs::PermissionsExt};

        fs::set_permissions(path, Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn writes_owner_only_base64_key() {
        let dir = TempDir::new("mongo-manager-key").unwrap();
        let path = dir.path().join(".key");

        create_key(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.len() >= 6 && contents.len() <= 1024);
        assert!(contents
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn generates_distinct_keys() {
        let dir = TempDir::new("mongo-manager-key").unwrap();
        let first = dir.path().join("a.key");
        let second = dir.path().join("b.key");

        create_key(&first).unwrap();
        create_key(&second).unwrap();

        assert_ne!(
            fs::read_to_string(&first).unwrap(),
            fs::read_to_string(&second).unwrap()
        );
    }
}
