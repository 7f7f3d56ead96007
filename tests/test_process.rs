//! Unit tests for dangerous-command detection and env-var sanitization.
//!
//! The stateless one-shot process runner this module used to also own has
//! been removed (superseded by the session-based exec path); these tests
//! cover what's left: `validate_command` and `is_sensitive_env`.

use shellmcp::process;

// ---------------------------------------------------------------------------
// Security: env var sanitization
// ---------------------------------------------------------------------------

#[test]
fn test_not_sensitive_by_default() {
    assert!(!process::is_sensitive_env("SOME_API_KEY"));
    assert!(!process::is_sensitive_env("PATH"));
}

// ---------------------------------------------------------------------------
// Security: dangerous command blocking (pattern matching only, never executed)
// ---------------------------------------------------------------------------

#[test]
fn test_block_rm_rf_root() {
    assert!(process::validate_command("rm -rf /").is_err());
    assert!(process::validate_command("rm -rf /*").is_err());
    assert!(process::validate_command("rm -Rf /").is_err());
    assert!(process::validate_command("rm -fr /").is_err());
    assert!(process::validate_command("rm --recursive --force /").is_err());
}

#[test]
fn test_block_rm_rf_system_paths() {
    assert!(process::validate_command("rm -rf /usr").is_err());
    assert!(process::validate_command("rm -rf /etc").is_err());
    assert!(process::validate_command("rm -rf /bin").is_err());
    assert!(process::validate_command("rm -rf /home").is_err());
    assert!(process::validate_command("rm -rf /var").is_err());
    assert!(process::validate_command("rm -rf /boot").is_err());
    assert!(process::validate_command("rm -rf /lib").is_err());
    assert!(process::validate_command("rm -rf /opt").is_err());
    assert!(process::validate_command("rm -rf /System").is_err());
    assert!(process::validate_command("rm -rf /Applications").is_err());
    assert!(process::validate_command("rm -rf /Users").is_err());
}

#[test]
fn test_block_rm_rf_with_sudo() {
    assert!(process::validate_command("sudo rm -rf /").is_err());
    assert!(process::validate_command("sudo rm -rf /usr").is_err());
}

#[test]
fn test_block_rm_rf_in_chain() {
    assert!(process::validate_command("echo hi && rm -rf /").is_err());
    assert!(process::validate_command("rm -rf /; echo done").is_err());
    assert!(process::validate_command("true || rm -rf /usr").is_err());
}

#[test]
fn test_allow_safe_rm_commands() {
    assert!(process::validate_command("rm -rf ./build").is_ok());
    assert!(process::validate_command("rm -rf /tmp/mytest").is_ok());
    assert!(process::validate_command("rm -rf target/").is_ok());
    assert!(process::validate_command("rm file.txt").is_ok());
    assert!(process::validate_command("rm -r ./node_modules").is_ok());
}

#[test]
fn test_block_mkfs() {
    assert!(process::validate_command("mkfs.ext4 /dev/sda1").is_err());
    assert!(process::validate_command("mkfs -t ext4 /dev/sda").is_err());
}

#[test]
fn test_block_dd_to_device() {
    assert!(process::validate_command("dd if=/dev/zero of=/dev/sda").is_err());
    assert!(process::validate_command("dd if=/dev/urandom of=/dev/nvme0n1").is_err());
}

#[test]
fn test_allow_safe_dd() {
    assert!(process::validate_command("dd if=/dev/zero of=/tmp/test.img bs=1M count=10").is_ok());
}

#[test]
fn test_block_fork_bomb() {
    assert!(process::validate_command(":(){ :|:& };:").is_err());
}

#[test]
fn test_block_shutdown_reboot() {
    assert!(process::validate_command("shutdown -h now").is_err());
    assert!(process::validate_command("reboot").is_err());
    assert!(process::validate_command("halt").is_err());
    assert!(process::validate_command("poweroff").is_err());
    assert!(process::validate_command("init 0").is_err());
    assert!(process::validate_command("init 6").is_err());
}

#[test]
fn test_block_chmod_chown_on_system_paths() {
    assert!(process::validate_command("chmod -R 777 /").is_err());
    assert!(process::validate_command("chmod -R 777 /usr").is_err());
    assert!(process::validate_command("chown -R nobody /").is_err());
    assert!(process::validate_command("chown -R nobody /etc").is_err());
}

#[test]
fn test_allow_safe_chmod_chown() {
    assert!(process::validate_command("chmod -R 755 ./dist").is_ok());
    assert!(process::validate_command("chown -R user:group ./project").is_ok());
    assert!(process::validate_command("chmod 644 file.txt").is_ok());
}

#[test]
fn test_block_device_redirect() {
    assert!(process::validate_command("echo x > /dev/sda").is_err());
    assert!(process::validate_command("cat file > /dev/nvme0n1").is_err());
}
