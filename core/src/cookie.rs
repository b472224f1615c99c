/*
 * cookie.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Magnet, a client SDK for the Magnet messaging platform.
 *
 * Magnet is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Magnet is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Magnet.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Persistent key-value cookie stores, used to keep the session's refresh
//! credential across restarts.
//!
//! Three backends: in memory, an encrypted file, and the system keychain.
//! The file holds XML (root `<cookies>`, `<cookie>` with `<name>` and
//! `<value>`) encrypted with XChaCha20-Poly1305; the key lives beside it in
//! `.key` (mode 0o600). File format: "MGENC" + 24-byte nonce + ciphertext.

use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::XChaCha20Poly1305;
use keyring::Entry;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use crate::error::ClientError;

const ENCRYPTED_MAGIC: &[u8] = b"MGENC";
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;

pub const KEYRING_SERVICE: &str = "magnet";

pub trait CookieStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, ClientError>;

    fn create(&self, name: &str, value: &str) -> Result<(), ClientError>;

    /// No-op if the cookie does not exist.
    fn remove(&self, name: &str) -> Result<(), ClientError>;
}

// ── Memory ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryCookieStore {
    cookies: Mutex<BTreeMap<String, String>>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieStore for MemoryCookieStore {
    fn get(&self, name: &str) -> Result<Option<String>, ClientError> {
        Ok(self
            .cookies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned())
    }

    fn create(&self, name: &str, value: &str) -> Result<(), ClientError> {
        self.cookies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), ClientError> {
        self.cookies.lock().unwrap_or_else(|e| e.into_inner()).remove(name);
        Ok(())
    }
}

// ── Keychain ─────────────────────────────────────────────────────────

/// One keyring entry per cookie name under a fixed service.
#[derive(Debug, Clone)]
pub struct KeychainCookieStore {
    service: String,
}

impl KeychainCookieStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Probe: create and delete a dummy entry.
    pub fn available(&self) -> bool {
        let entry = match Entry::new(&self.service, "__magnet_probe__") {
            Ok(e) => e,
            Err(_) => return false,
        };
        if entry.set_password("probe").is_err() {
            return false;
        }
        let _ = entry.delete_credential();
        true
    }

    fn entry(&self, name: &str) -> Result<Entry, ClientError> {
        Entry::new(&self.service, name).map_err(|e| ClientError::Cookie(e.to_string()))
    }
}

impl Default for KeychainCookieStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieStore for KeychainCookieStore {
    fn get(&self, name: &str) -> Result<Option<String>, ClientError> {
        match self.entry(name)?.get_password() {
            Ok(v) => Ok(Some(v)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ClientError::Cookie(e.to_string())),
        }
    }

    fn create(&self, name: &str, value: &str) -> Result<(), ClientError> {
        self.entry(name)?
            .set_password(value)
            .map_err(|e| ClientError::Cookie(e.to_string()))
    }

    fn remove(&self, name: &str) -> Result<(), ClientError> {
        let _ = self.entry(name)?.delete_credential();
        Ok(())
    }
}

// ── Encrypted file ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct EncryptedFileCookieStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EncryptedFileCookieStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `~/.magnet/cookies`.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .map(|h| h.join(".magnet").join("cookies"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, ClientError> {
        let raw = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let content = if raw.starts_with(ENCRYPTED_MAGIC) {
            if raw.len() < ENCRYPTED_MAGIC.len() + NONCE_LEN + 16 {
                return Err(ClientError::Cookie("encrypted cookie file too short".into()));
            }
            let key = read_key(&key_path(&self.path)?)?;
            let cipher = XChaCha20Poly1305::new_from_slice(&key)
                .map_err(|e| ClientError::Cookie(e.to_string()))?;
            let nonce = chacha20poly1305::XNonce::from_slice(
                &raw[ENCRYPTED_MAGIC.len()..ENCRYPTED_MAGIC.len() + NONCE_LEN],
            );
            let plain = cipher
                .decrypt(nonce, &raw[ENCRYPTED_MAGIC.len() + NONCE_LEN..])
                .map_err(|_| ClientError::Cookie("decryption failed (wrong key or tampered file)".into()))?;
            String::from_utf8(plain).map_err(|e| ClientError::Cookie(format!("decrypted content not UTF-8: {}", e)))?
        } else {
            String::from_utf8(raw).map_err(|e| ClientError::Cookie(format!("cookie file not UTF-8: {}", e)))?
        };
        parse_cookies_xml(&content)
    }

    fn store(&self, cookies: &BTreeMap<String, String>) -> Result<(), ClientError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| ClientError::Cookie("no parent directory for cookie file".into()))?;
        fs::create_dir_all(parent)?;
        #[cfg(unix)]
        drop(fs::set_permissions(parent, PermissionsExt::from_mode(0o700)));

        let plain = cookies_xml_to_bytes(cookies)?;
        let key = get_or_create_key(&key_path(&self.path)?)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&key).map_err(|e| ClientError::Cookie(e.to_string()))?;
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plain.as_ref())
            .map_err(|e| ClientError::Cookie(e.to_string()))?;
        let mut f = open_private(&self.path)?;
        f.write_all(ENCRYPTED_MAGIC)?;
        f.write_all(nonce.as_slice())?;
        f.write_all(&ciphertext)?;
        f.flush()?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), ClientError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut cookies = self.load()?;
        apply(&mut cookies);
        self.store(&cookies)
    }
}

impl CookieStore for EncryptedFileCookieStore {
    fn get(&self, name: &str) -> Result<Option<String>, ClientError> {
        Ok(self.load()?.remove(name))
    }

    fn create(&self, name: &str, value: &str) -> Result<(), ClientError> {
        if name.contains('\0') || value.contains('\0') {
            return Err(ClientError::Cookie("cookie values must not contain NUL (U+0000)".into()));
        }
        self.update(|c| {
            c.insert(name.to_string(), value.to_string());
        })
    }

    fn remove(&self, name: &str) -> Result<(), ClientError> {
        if !self.path.exists() {
            return Ok(());
        }
        self.update(|c| {
            c.remove(name);
        })
    }
}

fn key_path(path: &Path) -> Result<PathBuf, ClientError> {
    path.parent()
        .map(|p| p.join(".key"))
        .ok_or_else(|| ClientError::Cookie("no parent directory for cookie file".into()))
}

fn read_key(path: &Path) -> Result<[u8; KEY_LEN], ClientError> {
    let buf = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ClientError::Cookie("encrypted cookie file but key file not found".into())
        } else {
            e.into()
        }
    })?;
    if buf.len() != KEY_LEN {
        return Err(ClientError::Cookie("key file has wrong length".into()));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&buf);
    Ok(key)
}

fn get_or_create_key(path: &Path) -> Result<[u8; KEY_LEN], ClientError> {
    if path.exists() {
        return read_key(path);
    }
    let mut key = [0u8; KEY_LEN];
    getrandom::getrandom(&mut key).map_err(|e| ClientError::Cookie(e.to_string()))?;
    let mut f = open_private(path)?;
    f.write_all(&key)?;
    f.flush()?;
    Ok(key)
}

/// Create or truncate with mode 0o600 on Unix.
fn open_private(path: &Path) -> Result<File, ClientError> {
    #[cfg(unix)]
    {
        Ok(fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .mode(0o600)
            .open(path)?)
    }
    #[cfg(not(unix))]
    {
        Ok(File::create(path)?)
    }
}

fn parse_cookies_xml(content: &str) -> Result<BTreeMap<String, String>, ClientError> {
    let mut out = BTreeMap::new();
    if content.trim().is_empty() {
        return Ok(out);
    }
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut name = String::new();
    let mut value = String::new();
    let mut in_cookie = false;
    let mut element = Vec::<u8>::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => return Err(ClientError::Cookie(format!("XML parse error: {}", e))),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let tag = e.name();
                let tag = tag.as_ref();
                if tag == b"cookie" {
                    in_cookie = true;
                    name.clear();
                    value.clear();
                } else if in_cookie && (tag == b"name" || tag == b"value") {
                    element.clear();
                    element.extend_from_slice(tag);
                }
            }
            Ok(Event::Text(e)) => {
                if !in_cookie || element.is_empty() {
                    continue;
                }
                let text = e.unescape().map_err(|e| ClientError::Cookie(e.to_string()))?.into_owned();
                if element == b"name" {
                    name = text;
                } else {
                    value = text;
                }
                element.clear();
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"cookie" {
                    if !name.is_empty() {
                        out.insert(std::mem::take(&mut name), std::mem::take(&mut value));
                    }
                    in_cookie = false;
                }
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn xml_err(e: impl std::fmt::Display) -> ClientError {
    ClientError::Cookie(e.to_string())
}

fn cookies_xml_to_bytes(cookies: &BTreeMap<String, String>) -> Result<Vec<u8>, ClientError> {
    let mut out = Vec::new();
    let mut writer = Writer::new(&mut out);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("cookies")))
        .map_err(xml_err)?;
    for (name, value) in cookies {
        writer
            .write_event(Event::Start(BytesStart::new("cookie")))
            .map_err(xml_err)?;
        for (tag, text) in [("name", name), ("value", value)] {
            writer
                .write_event(Event::Start(BytesStart::new(tag)))
                .map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(text.as_str())))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new(tag)))
                .map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("cookie")))
            .map_err(xml_err)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("cookies")))
        .map_err(xml_err)?;
    Ok(out)
}
