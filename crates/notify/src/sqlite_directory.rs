//! SQLite-backed read-only directory over the platform tables.
//!
//! The notification core only ever SELECTs here (the database is opened
//! read-only to make that a hard guarantee); the joins mirror the platform's
//! Allocation→Facilitator→User chain, with broken chains surfacing as `None`
//! contacts for callers to skip.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use rusqlite::{params, Connection, OpenFlags};
use tracing::info;

use coursepulse_core::{AllocationId, FacilitatorId};

use crate::directory::{
    Contact, Directory, DirectoryError, FacilitatorContact, ManagerContact, OverdueLog,
};

/// Read-only directory over the platform's SQLite database.
pub struct SqliteDirectory {
    conn: Mutex<Connection>,
}

impl SqliteDirectory {
    /// Open the platform database read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DirectoryError> {
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(query_err)?;
        info!(path = %path.as_ref().display(), "opened platform directory (read-only)");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn query_err(e: rusqlite::Error) -> DirectoryError {
    DirectoryError(e.to_string())
}

fn parse_allocation(raw: &str) -> Result<AllocationId, DirectoryError> {
    AllocationId::from_str(raw).map_err(|e| DirectoryError(e.to_string()))
}

fn contact(name: Option<String>, email: Option<String>) -> Option<Contact> {
    match (name, email) {
        (Some(name), Some(email)) => Some(Contact { name, email }),
        _ => None,
    }
}

impl Directory for SqliteDirectory {
    fn overdue_logs(&self, before_week: u32) -> Result<Vec<OverdueLog>, DirectoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT l.week, l.allocation_id, u.name, u.email
                 FROM activity_logs l
                 JOIN allocations a ON a.id = l.allocation_id
                 LEFT JOIN facilitators f ON f.id = a.facilitator_id
                 LEFT JOIN users u ON u.id = f.user_id
                 WHERE l.week < ?1
                 ORDER BY l.week ASC, l.allocation_id ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![before_week], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(query_err)?;

        let mut logs = Vec::new();
        for row in rows {
            let (week, allocation_id, name, email) = row.map_err(query_err)?;
            logs.push(OverdueLog {
                week,
                allocation_id: parse_allocation(&allocation_id)?,
                facilitator: contact(name, email),
            });
        }
        Ok(logs)
    }

    fn facilitators(&self) -> Result<Vec<FacilitatorContact>, DirectoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT f.id, u.name, u.email, a.id
                 FROM facilitators f
                 LEFT JOIN users u ON u.id = f.user_id
                 LEFT JOIN allocations a ON a.facilitator_id = f.id
                 ORDER BY f.id ASC, a.id ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(query_err)?;

        // Rows arrive ordered by facilitator; fold consecutive allocation
        // rows into one contact each.
        let mut facilitators: Vec<FacilitatorContact> = Vec::new();
        let mut last_id: Option<String> = None;
        for row in rows {
            let (raw_id, name, email, allocation) = row.map_err(query_err)?;
            if last_id.as_deref() != Some(raw_id.as_str()) {
                facilitators.push(FacilitatorContact {
                    id: FacilitatorId::from_str(&raw_id)
                        .map_err(|e| DirectoryError(e.to_string()))?,
                    name: name.unwrap_or_default(),
                    email,
                    allocations: Vec::new(),
                });
                last_id = Some(raw_id);
            }
            if let Some(raw_allocation) = allocation {
                let parsed = parse_allocation(&raw_allocation)?;
                if let Some(current) = facilitators.last_mut() {
                    current.allocations.push(parsed);
                }
            }
        }
        Ok(facilitators)
    }

    fn managers(&self) -> Result<Vec<ManagerContact>, DirectoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT u.name, u.email
                 FROM managers m
                 LEFT JOIN users u ON u.id = m.user_id
                 ORDER BY m.id ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                ))
            })
            .map_err(query_err)?;

        let mut managers = Vec::new();
        for row in rows {
            let (name, email) = row.map_err(query_err)?;
            managers.push(ManagerContact {
                name: name.unwrap_or_default(),
                email,
            });
        }
        Ok(managers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursepulse_core::UserId;

    const PLATFORM_SCHEMA: &str = "
    CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT NOT NULL, email TEXT NOT NULL);
    CREATE TABLE facilitators (id TEXT PRIMARY KEY, user_id TEXT);
    CREATE TABLE managers (id TEXT PRIMARY KEY, user_id TEXT);
    CREATE TABLE allocations (id TEXT PRIMARY KEY, facilitator_id TEXT NOT NULL);
    CREATE TABLE activity_logs (id TEXT PRIMARY KEY, allocation_id TEXT NOT NULL, week INTEGER NOT NULL);
    ";

    struct Fixture {
        _dir: tempfile::TempDir,
        directory: SqliteDirectory,
    }

    fn seed(populate: impl FnOnce(&Connection)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("platform.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(PLATFORM_SCHEMA).unwrap();
        populate(&conn);
        drop(conn);
        Fixture {
            _dir: dir,
            directory: SqliteDirectory::open(&path).unwrap(),
        }
    }

    fn insert_user(conn: &Connection, name: &str, email: &str) -> UserId {
        let id = UserId::new();
        conn.execute(
            "INSERT INTO users (id, name, email) VALUES (?1, ?2, ?3)",
            params![id.to_string(), name, email],
        )
        .unwrap();
        id
    }

    fn insert_facilitator(conn: &Connection, user_id: Option<UserId>) -> FacilitatorId {
        let id = FacilitatorId::new();
        conn.execute(
            "INSERT INTO facilitators (id, user_id) VALUES (?1, ?2)",
            params![id.to_string(), user_id.map(|u| u.to_string())],
        )
        .unwrap();
        id
    }

    fn insert_allocation(conn: &Connection, facilitator_id: FacilitatorId) -> AllocationId {
        let id = AllocationId::new();
        conn.execute(
            "INSERT INTO allocations (id, facilitator_id) VALUES (?1, ?2)",
            params![id.to_string(), facilitator_id.to_string()],
        )
        .unwrap();
        id
    }

    fn insert_log(conn: &Connection, allocation_id: AllocationId, week: u32) {
        conn.execute(
            "INSERT INTO activity_logs (id, allocation_id, week) VALUES (?1, ?2, ?3)",
            params![uuid::Uuid::now_v7().to_string(), allocation_id.to_string(), week],
        )
        .unwrap();
    }

    #[test]
    fn overdue_logs_resolve_the_facilitator_chain() {
        let fixture = seed(|conn| {
            let user = insert_user(conn, "F", "f@x.com");
            let facilitator = insert_facilitator(conn, Some(user));
            let allocation = insert_allocation(conn, facilitator);
            insert_log(conn, allocation, 1);
            insert_log(conn, allocation, 5); // not overdue at before_week=5
        });

        let logs = fixture.directory.overdue_logs(5).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].week, 1);
        assert_eq!(
            logs[0].facilitator,
            Some(Contact {
                name: "F".to_string(),
                email: "f@x.com".to_string(),
            })
        );
    }

    #[test]
    fn broken_chains_come_back_without_a_contact() {
        let fixture = seed(|conn| {
            let facilitator = insert_facilitator(conn, None); // no user
            let allocation = insert_allocation(conn, facilitator);
            insert_log(conn, allocation, 2);
        });

        let logs = fixture.directory.overdue_logs(5).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].facilitator.is_none());
    }

    #[test]
    fn facilitators_carry_all_their_allocations() {
        let fixture = seed(|conn| {
            let user = insert_user(conn, "F", "f@x.com");
            let facilitator = insert_facilitator(conn, Some(user));
            insert_allocation(conn, facilitator);
            insert_allocation(conn, facilitator);
            insert_allocation(conn, facilitator);

            let idle_user = insert_user(conn, "Idle", "idle@x.com");
            insert_facilitator(conn, Some(idle_user));
        });

        let mut facilitators = fixture.directory.facilitators().unwrap();
        facilitators.sort_by_key(|f| f.allocations.len());

        assert_eq!(facilitators.len(), 2);
        assert_eq!(facilitators[0].allocations.len(), 0);
        assert_eq!(facilitators[1].allocations.len(), 3);
        assert_eq!(facilitators[1].email.as_deref(), Some("f@x.com"));
    }

    #[test]
    fn managers_list_resolves_user_rows() {
        let fixture = seed(|conn| {
            let user = insert_user(conn, "M", "m@x.com");
            conn.execute(
                "INSERT INTO managers (id, user_id) VALUES (?1, ?2)",
                params![uuid::Uuid::now_v7().to_string(), user.to_string()],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO managers (id, user_id) VALUES (?1, NULL)",
                params![uuid::Uuid::now_v7().to_string()],
            )
            .unwrap();
        });

        let managers = fixture.directory.managers().unwrap();
        assert_eq!(managers.len(), 2);
        let with_email: Vec<_> = managers.iter().filter(|m| m.email.is_some()).collect();
        assert_eq!(with_email.len(), 1);
        assert_eq!(with_email[0].email.as_deref(), Some("m@x.com"));
    }
}
