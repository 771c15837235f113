use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            CREATE TYPE "job_status" AS ENUM ('queued', 'processing', 'completed', 'failed');

            CREATE TYPE "indicator_type" AS ENUM ('domain', 'email', 'ipv4');

            CREATE TABLE "processed_files" (
                "telegram_file_id" text PRIMARY KEY,
                "channel_id" bigint NOT NULL,
                "channel_title" text NOT NULL,
                "filename" text NOT NULL,
                "size_bytes" bigint NOT NULL,
                "file_hash" char(64) NOT NULL,
                "storage_path" text NOT NULL,
                "first_seen_at" timestamptz NOT NULL DEFAULT now(),
                "last_seen_at" timestamptz NOT NULL DEFAULT now()
            );

            CREATE INDEX "processed_files_file_hash_index"
                ON "processed_files" ("file_hash");

            CREATE INDEX "processed_files_channel_id_first_seen_at_index"
                ON "processed_files" ("channel_id", "first_seen_at");

            CREATE TABLE "processing_jobs" (
                "job_id" uuid PRIMARY KEY,
                "telegram_file_id" text NOT NULL,
                "status" job_status NOT NULL,
                "error" text,
                "file_hash" char(64),
                "created_at" timestamptz NOT NULL DEFAULT now(),
                "updated_at" timestamptz NOT NULL DEFAULT now()
            );

            CREATE INDEX "processing_jobs_status_created_at_index"
                ON "processing_jobs" ("status", "created_at");

            CREATE INDEX "processing_jobs_telegram_file_id_index"
                ON "processing_jobs" ("telegram_file_id");

            CREATE TABLE "extracted_indicators" (
                "id" bigserial PRIMARY KEY,
                "indicator_type" indicator_type NOT NULL,
                "value" text NOT NULL,
                "source_file_hash" char(64) NOT NULL,
                "source_relative_path" text NOT NULL,
                "source_line" integer NOT NULL,
                "channel_id" bigint NOT NULL,
                "first_seen_at" timestamptz NOT NULL DEFAULT now(),
                "last_seen_at" timestamptz NOT NULL DEFAULT now(),
                CONSTRAINT "extracted_indicators_unique"
                    UNIQUE ("indicator_type", "value", "source_file_hash", "source_line")
            );

            COMMENT ON TABLE "processed_files" IS 'Artifacts successfully ingested into the content store';

            COMMENT ON TABLE "processing_jobs" IS 'Attempt history; rows are kept for failed jobs with no matching processed file';

            COMMENT ON TABLE "extracted_indicators" IS 'Indicators mined from archive members, keyed by the enclosing archive hash'
        "#;
        crate::from_sql(manager, sql).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            DROP TABLE "extracted_indicators";
            DROP TABLE "processing_jobs";
            DROP TABLE "processed_files";
            DROP TYPE "indicator_type";
            DROP TYPE "job_status"
        "#;
        crate::from_sql(manager, sql).await
    }
}
